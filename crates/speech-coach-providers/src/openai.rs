//! OpenAI backend: Whisper transcription, audio-capable chat for evaluation,
//! JSON-mode chat for segmentation and viewpoint extension.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use speech_coach_core::config::{ProviderConfig, ProviderKind};
use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{
    ChunkFeedback, ContentChunk, FullEvaluation, Transcript, TranscriptSegment,
    ViewpointExtension,
};

use crate::http::check_status;
use crate::{AudioClip, ChunkRequest, SpeechBackend, prompts, reply};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
const DEFAULT_AUDIO_MODEL: &str = "gpt-4o-audio-preview";
const DEFAULT_TEXT_MODEL: &str = "gpt-4o";
const ID: &str = "openai";

pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    transcription_model: String,
    audio_model: String,
    text_model: String,
    max_sub_score: f64,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.into(),
            audio_model: DEFAULT_AUDIO_MODEL.into(),
            text_model: DEFAULT_TEXT_MODEL.into(),
            max_sub_score: 10.0,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, or `None` when no API key resolves.
    pub fn from_config(config: &ProviderConfig, max_sub_score: f64) -> Option<Self> {
        let api_key = config.resolve_api_key()?;
        let mut backend = Self::new(api_key, config.base_url.as_deref());
        if let Some(m) = &config.transcription_model {
            backend.transcription_model = m.clone();
        }
        if let Some(m) = &config.audio_model {
            backend.audio_model = m.clone();
        }
        if let Some(m) = &config.text_model {
            backend.text_model = m.clone();
        }
        backend.max_sub_score = max_sub_score;
        Some(backend)
    }

    /// POST a chat completion and return the first choice's text.
    async fn chat(&self, body: serde_json::Value) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        let response = check_status(ID, response).await?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(ID, e))?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::malformed(ID, "completion has no content"))
    }

    /// Chat with an audio attachment plus instructions.
    async fn chat_with_audio(&self, audio: &AudioClip, prompt: String) -> Result<String, ProviderError> {
        let format = input_audio_format(audio)?;
        let data = base64::engine::general_purpose::STANDARD.encode(&audio.data);
        debug!(model = %self.audio_model, bytes = audio.data.len(), "OpenAI audio chat");
        self.chat(json!({
            "model": self.audio_model,
            "modalities": ["text"],
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "input_audio", "input_audio": { "data": data, "format": format } },
                    { "type": "text", "text": prompt },
                ]
            }]
        }))
        .await
    }

    /// Text chat in JSON mode.
    async fn chat_json(&self, prompt: String) -> Result<String, ProviderError> {
        debug!(model = %self.text_model, "OpenAI JSON chat");
        self.chat(json!({
            "model": self.text_model,
            "response_format": { "type": "json_object" },
            "messages": [{ "role": "user", "content": prompt }]
        }))
        .await
    }
}

/// Audio chat accepts wav and mp3 only.
fn input_audio_format(audio: &AudioClip) -> Result<&'static str, ProviderError> {
    match audio.format.as_str() {
        "mp3" => Ok("mp3"),
        "wav" => Ok("wav"),
        _ => Err(ProviderError::Unsupported {
            provider: ID.into(),
            capability: "audio input other than mp3/wav",
        }),
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    segments: Vec<TranscriptSegment>,
}

#[async_trait]
impl SpeechBackend for OpenAiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn transcribe(&self, audio: &AudioClip) -> Result<Transcript, ProviderError> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        debug!(model = %self.transcription_model, bytes = audio.data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(audio.data.to_vec())
            .file_name(format!("audio.{}", audio.format))
            .mime_str(audio.mime_type())
            .map_err(|e| ProviderError::request(ID, e))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment")
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        let response = check_status(ID, response).await?;

        let verbose: VerboseTranscription = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(ID, e))?;
        let mut segments = verbose.segments;
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(Transcript {
            text: verbose.text.trim().to_string(),
            segments,
        })
    }

    async fn evaluate_full(
        &self,
        audio: &AudioClip,
        context: &str,
    ) -> Result<FullEvaluation, ProviderError> {
        let text = self
            .chat_with_audio(audio, prompts::full_evaluation(context, self.max_sub_score))
            .await?;
        reply::full_evaluation(ID, &text)
    }

    async fn evaluate_chunk(&self, request: ChunkRequest<'_>) -> Result<ChunkFeedback, ProviderError> {
        let with_audio = !request.audio.is_empty();
        let prompt =
            prompts::chunk_critique(request.text, request.chunk_type, request.prior, with_audio);
        let text = if with_audio {
            self.chat_with_audio(request.audio, prompt).await?
        } else {
            self.chat_json(prompt).await?
        };
        reply::chunk_feedback(ID, &text)
    }

    async fn segment(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Vec<ContentChunk>, ProviderError> {
        let text = self
            .chat_json(prompts::segmentation(context, transcript))
            .await?;
        reply::segments(ID, &text)
    }

    async fn extend_viewpoints(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Vec<ViewpointExtension>, ProviderError> {
        let text = self
            .chat_json(prompts::viewpoint_extension(context, transcript))
            .await?;
        reply::viewpoints(ID, &text)
    }
}
