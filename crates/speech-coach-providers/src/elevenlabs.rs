//! ElevenLabs instant voice cloning and text-to-speech.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use speech_coach_core::config::VoiceConfig;
use speech_coach_core::error::ProviderError;

use crate::http::check_status;
use crate::{AudioClip, VoiceBackend};

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";
const DEFAULT_OUTPUT_FORMAT: &str = "mp3_44100_128";
const ID: &str = "elevenlabs";

pub struct ElevenLabsVoice {
    base_url: String,
    api_key: String,
    model: String,
    output_format: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct AddVoiceResponse {
    voice_id: String,
}

impl ElevenLabsVoice {
    pub fn new(api_key: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key,
            model: DEFAULT_MODEL.into(),
            output_format: DEFAULT_OUTPUT_FORMAT.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, or `None` when no API key resolves.
    pub fn from_config(config: &VoiceConfig) -> Option<Self> {
        let mut voice = Self::new(config.resolve_api_key()?);
        if let Some(url) = &config.base_url {
            voice.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = &config.model {
            voice.model = model.clone();
        }
        if let Some(format) = &config.output_format {
            voice.output_format = format.clone();
        }
        Some(voice)
    }
}

#[async_trait]
impl VoiceBackend for ElevenLabsVoice {
    fn id(&self) -> &str {
        ID
    }

    async fn clone_voice(
        &self,
        name: &str,
        description: &str,
        sample: &AudioClip,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/v1/voices/add", self.base_url);
        debug!(name, bytes = sample.data.len(), "Cloning voice");

        let part = reqwest::multipart::Part::bytes(sample.data.to_vec())
            .file_name(format!("sample.{}", sample.format))
            .mime_str(sample.mime_type())
            .map_err(|e| ProviderError::request(ID, e))?;
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .text("description", description.to_string())
            .part("files", part);

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        let response = check_status(ID, response).await?;

        let added: AddVoiceResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(ID, e))?;
        Ok(added.voice_id)
    }

    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Bytes, ProviderError> {
        let url = format!(
            "{}/v1/text-to-speech/{voice_id}?output_format={}",
            self.base_url, self.output_format
        );
        debug!(voice_id, text_len = text.len(), "Synthesizing speech");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "text": text,
                "model_id": self.model,
            }))
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        let response = check_status(ID, response).await?;

        let audio = response
            .bytes()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        if audio.is_empty() {
            return Err(ProviderError::malformed(ID, "empty audio"));
        }
        Ok(audio)
    }

    async fn delete_voice(&self, voice_id: &str) -> Result<(), ProviderError> {
        let url = format!("{}/v1/voices/{voice_id}", self.base_url);
        let response = self
            .client
            .delete(&url)
            .header("xi-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::request(ID, e))?;
        check_status(ID, response).await?;
        debug!(voice_id, "Deleted voice");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_overrides() {
        let config = VoiceConfig {
            api_key: Some("xi-test".into()),
            base_url: Some("http://localhost:7777/".into()),
            output_format: Some("mp3_22050_32".into()),
            ..VoiceConfig::default()
        };
        let voice = ElevenLabsVoice::from_config(&config).unwrap();
        assert_eq!(voice.base_url, "http://localhost:7777");
        assert_eq!(voice.output_format, "mp3_22050_32");
        assert_eq!(voice.model, DEFAULT_MODEL);
    }
}
