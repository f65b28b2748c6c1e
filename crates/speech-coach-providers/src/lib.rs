//! AI and voice backend abstraction.
//!
//! Each backend implements the [`SpeechBackend`] capabilities it supports.
//! The [`ProviderGateway`] routes every capability through a prioritized
//! [`FailoverChain`] and owns the scoring formula, so callers never see which
//! backend answered.

use async_trait::async_trait;
use bytes::Bytes;

use speech_coach_core::config::ProviderKind;
use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{
    ChunkFeedback, ChunkType, ContentChunk, FullEvaluation, PriorChunk, Transcript,
    ViewpointExtension,
};

pub mod elevenlabs;
pub mod failover;
pub mod gateway;
pub mod gemini;
mod http;
pub mod openai;
pub mod prompts;
pub mod reply;
pub mod scoring;

pub use failover::{FailoverChain, TimedVoice};
pub use gateway::{ProviderGateway, ProviderGatewayBuilder};
pub use scoring::ScoringScale;

/// Operations a backend may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Transcribe,
    EvaluateFull,
    EvaluateChunk,
    Segment,
    ExtendViewpoints,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Transcribe,
        Capability::EvaluateFull,
        Capability::EvaluateChunk,
        Capability::Segment,
        Capability::ExtendViewpoints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::EvaluateFull => "evaluate_full",
            Self::EvaluateChunk => "evaluate_chunk",
            Self::Segment => "segment",
            Self::ExtendViewpoints => "extend_viewpoints",
        }
    }
}

/// Encoded audio handed to a backend.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub data: Bytes,
    /// Container/codec extension, e.g. "mp3", "wav", "webm".
    pub format: String,
}

impl AudioClip {
    pub fn new(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            format: format.into(),
        }
    }

    /// True when the clip carries no audio, e.g. a chunk past the end of the recording.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        match self.format.as_str() {
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "ogg" => "audio/ogg",
            "mp4" | "m4a" => "audio/mp4",
            _ => "audio/webm",
        }
    }
}

/// Input for a single chunk critique.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRequest<'a> {
    pub audio: &'a AudioClip,
    pub text: &'a str,
    pub chunk_type: ChunkType,
    /// Synopses of strictly earlier chunks, oldest first.
    pub prior: &'a [PriorChunk],
}

fn unsupported(provider: &str, capability: Capability) -> ProviderError {
    ProviderError::Unsupported {
        provider: provider.to_string(),
        capability: capability.as_str(),
    }
}

/// An AI backend. Capabilities it does not implement return
/// [`ProviderError::Unsupported`], which a failover chain treats like any
/// other failure.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Identifier used in logs and errors.
    fn id(&self) -> &str {
        self.kind().as_str()
    }

    async fn transcribe(&self, _audio: &AudioClip) -> Result<Transcript, ProviderError> {
        Err(unsupported(self.id(), Capability::Transcribe))
    }

    async fn evaluate_full(
        &self,
        _audio: &AudioClip,
        _context: &str,
    ) -> Result<FullEvaluation, ProviderError> {
        Err(unsupported(self.id(), Capability::EvaluateFull))
    }

    async fn evaluate_chunk(
        &self,
        _request: ChunkRequest<'_>,
    ) -> Result<ChunkFeedback, ProviderError> {
        Err(unsupported(self.id(), Capability::EvaluateChunk))
    }

    async fn segment(
        &self,
        _transcript: &Transcript,
        _context: &str,
    ) -> Result<Vec<ContentChunk>, ProviderError> {
        Err(unsupported(self.id(), Capability::Segment))
    }

    async fn extend_viewpoints(
        &self,
        _transcript: &Transcript,
        _context: &str,
    ) -> Result<Vec<ViewpointExtension>, ProviderError> {
        Err(unsupported(self.id(), Capability::ExtendViewpoints))
    }
}

/// Voice cloning and text-to-speech backend.
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    fn id(&self) -> &str;

    /// Create a voice profile from a sample, returning its id.
    async fn clone_voice(
        &self,
        name: &str,
        description: &str,
        sample: &AudioClip,
    ) -> Result<String, ProviderError>;

    /// Speak `text` with the given voice, returning encoded audio (mp3).
    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Bytes, ProviderError>;

    async fn delete_voice(&self, voice_id: &str) -> Result<(), ProviderError>;
}
