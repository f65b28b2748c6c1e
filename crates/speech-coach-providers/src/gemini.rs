//! Google Generative AI (Gemini) backend.
//!
//! Uses `generateContent` with inline audio and JSON response mode.
//! Auth is via API key in query parameter.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use speech_coach_core::config::{ProviderConfig, ProviderKind};
use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{ChunkFeedback, ContentChunk, FullEvaluation, Transcript, ViewpointExtension};

use crate::http::check_status;
use crate::{AudioClip, ChunkRequest, SpeechBackend, prompts, reply};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const ID: &str = "gemini";

pub struct GeminiBackend {
    base_url: String,
    api_key: String,
    audio_model: String,
    text_model: String,
    max_sub_score: f64,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(api_key: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            audio_model: DEFAULT_MODEL.into(),
            text_model: DEFAULT_MODEL.into(),
            max_sub_score: 10.0,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, or `None` when no API key resolves.
    pub fn from_config(config: &ProviderConfig, max_sub_score: f64) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        let mut backend = Self::new(api_key, config.base_url.as_deref());
        if let Some(m) = &config.audio_model {
            backend.audio_model = m.clone();
        }
        if let Some(m) = &config.text_model {
            backend.text_model = m.clone();
        }
        backend.max_sub_score = max_sub_score;
        Some(backend)
    }

    async fn generate(&self, model: &str, parts: Vec<serde_json::Value>) -> Result<String, ProviderError> {
        let body = GeminiRequest {
            contents: vec![json!({ "role": "user", "parts": parts })],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature: Some(0.2),
            },
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        debug!(%model, "Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        let response = check_status(ID, response).await?;

        let reply: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(ID, e))?;
        reply
            .text()
            .ok_or_else(|| ProviderError::malformed(ID, "response has no text candidate"))
    }

    async fn generate_with_audio(&self, audio: &AudioClip, prompt: String) -> Result<String, ProviderError> {
        let data = base64::engine::general_purpose::STANDARD.encode(&audio.data);
        let parts = vec![
            json!({ "inline_data": { "mime_type": audio.mime_type(), "data": data } }),
            json!({ "text": prompt }),
        ];
        self.generate(&self.audio_model, parts).await
    }

    async fn generate_text(&self, prompt: String) -> Result<String, ProviderError> {
        self.generate(&self.text_model, vec![json!({ "text": prompt })])
            .await
    }
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<serde_json::Value>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate.
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.is_empty()).then_some(text)
    }
}

#[async_trait]
impl SpeechBackend for GeminiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn evaluate_full(
        &self,
        audio: &AudioClip,
        context: &str,
    ) -> Result<FullEvaluation, ProviderError> {
        let text = self
            .generate_with_audio(audio, prompts::full_evaluation(context, self.max_sub_score))
            .await?;
        reply::full_evaluation(ID, &text)
    }

    async fn evaluate_chunk(&self, request: ChunkRequest<'_>) -> Result<ChunkFeedback, ProviderError> {
        let with_audio = !request.audio.is_empty();
        let prompt =
            prompts::chunk_critique(request.text, request.chunk_type, request.prior, with_audio);
        let text = if with_audio {
            self.generate_with_audio(request.audio, prompt).await?
        } else {
            self.generate_text(prompt).await?
        };
        reply::chunk_feedback(ID, &text)
    }

    async fn segment(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Vec<ContentChunk>, ProviderError> {
        let text = self
            .generate_text(prompts::segmentation(context, transcript))
            .await?;
        reply::segments(ID, &text)
    }

    async fn extend_viewpoints(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Vec<ViewpointExtension>, ProviderError> {
        let text = self
            .generate_text(prompts::viewpoint_extension(context, transcript))
            .await?;
        reply::viewpoints(ID, &text)
    }
}
