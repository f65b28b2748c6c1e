//! Best-effort resynthesis of corrected text in the speaker's cloned voice.
//!
//! Nothing here fails a run: every error degrades to a missing clip.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{debug, info, warn};

use speech_coach_core::blob::BlobStore;
use speech_coach_core::error::Result;
use speech_coach_core::types::{ChunkFeedback, Recording};
use speech_coach_providers::{AudioClip, VoiceBackend};

/// A cloned voice profile. Deleted by [`release`](Self::release), or in the
/// background if dropped before that.
struct VoiceProfile {
    backend: Arc<dyn VoiceBackend>,
    voice_id: Option<String>,
}

impl VoiceProfile {
    fn id(&self) -> &str {
        self.voice_id.as_deref().unwrap_or_default()
    }

    async fn release(mut self) {
        if let Some(voice_id) = self.voice_id.take() {
            delete_voice(self.backend.clone(), voice_id).await;
        }
    }
}

impl Drop for VoiceProfile {
    fn drop(&mut self) {
        let Some(voice_id) = self.voice_id.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(delete_voice(self.backend.clone(), voice_id));
        } else {
            warn!(voice_id, "No runtime to delete cloned voice; profile leaked");
        }
    }
}

async fn delete_voice(backend: Arc<dyn VoiceBackend>, voice_id: String) {
    match backend.delete_voice(&voice_id).await {
        Ok(()) => debug!(voice_id, "Cloned voice deleted"),
        Err(e) => warn!(voice_id, error = %e, "Failed to delete cloned voice"),
    }
}

pub struct VoiceResynthesizer {
    voice: Option<Arc<dyn VoiceBackend>>,
    blobs: Arc<dyn BlobStore>,
    url_ttl: Duration,
}

impl VoiceResynthesizer {
    pub fn new(
        voice: Option<Arc<dyn VoiceBackend>>,
        blobs: Arc<dyn BlobStore>,
        url_ttl: Duration,
    ) -> Self {
        Self {
            voice,
            blobs,
            url_ttl,
        }
    }

    /// Playback URL per chunk, `None` where synthesis did not succeed.
    /// The cloned profile is deleted once every synthesis call has settled.
    pub async fn run(
        &self,
        recording: &Recording,
        sample: &AudioClip,
        feedback: &[ChunkFeedback],
    ) -> Vec<Option<String>> {
        let none = vec![None; feedback.len()];
        let Some(backend) = self.voice.clone() else {
            debug!("Voice synthesis not configured");
            return none;
        };
        if feedback.is_empty() {
            return none;
        }

        let name = format!("coach_user_{}", recording.recording_id);
        let description = format!("Cloned from recording {}", recording.recording_id);
        let voice_id = match backend.clone_voice(&name, &description, sample).await {
            Ok(id) => id,
            Err(e) => {
                warn!(recording_id = %recording.recording_id, error = %e, "Voice cloning failed");
                return none;
            }
        };
        let profile = VoiceProfile {
            backend: backend.clone(),
            voice_id: Some(voice_id),
        };
        debug!(voice_id = profile.id(), "Voice cloned");

        let calls = feedback.iter().enumerate().map(|(i, fb)| {
            let backend = backend.clone();
            let profile = &profile;
            async move {
                if fb.corrected_text.trim().is_empty() {
                    return None;
                }
                match self
                    .synthesize_chunk(backend.as_ref(), profile.id(), recording, i, &fb.corrected_text)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(chunk = i, error = %e, "Chunk resynthesis failed");
                        None
                    }
                }
            }
        });
        let urls = join_all(calls).await;
        profile.release().await;

        info!(
            recording_id = %recording.recording_id,
            generated = urls.iter().filter(|u| u.is_some()).count(),
            chunks = urls.len(),
            "Voice resynthesis finished"
        );
        urls
    }

    async fn synthesize_chunk(
        &self,
        backend: &dyn VoiceBackend,
        voice_id: &str,
        recording: &Recording,
        index: usize,
        text: &str,
    ) -> Result<String> {
        let audio: Bytes = backend.synthesize(voice_id, text).await?;
        let key = format!(
            "cloned/{}/{}/chunk_{index}.mp3",
            recording.question_id, recording.recording_id
        );
        self.blobs.put(&key, audio, "audio/mpeg").await?;
        self.blobs.presigned_url(&key, self.url_ttl).await
    }
}
