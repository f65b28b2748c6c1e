//! Failover chain: tries backends for one capability in priority order.
//!
//! On any [`ProviderError`] the next backend is tried. If every backend fails,
//! the last error is returned unmodified.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use speech_coach_core::error::ProviderError;

use crate::{AudioClip, Capability, SpeechBackend, VoiceBackend};

/// Await `call`, failing with [`ProviderError::Timeout`] once `limit` elapses.
pub async fn bounded<T, Fut>(
    provider: &str,
    limit: Option<Duration>,
    call: Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            provider: provider.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

#[derive(Clone)]
pub struct FailoverChain {
    capability: Capability,
    backends: Vec<Arc<dyn SpeechBackend>>,
    timeout: Option<Duration>,
}

impl FailoverChain {
    /// The first backend is primary; others are fallbacks.
    pub fn new(capability: Capability, backends: Vec<Arc<dyn SpeechBackend>>) -> Self {
        Self {
            capability,
            backends,
            timeout: None,
        }
    }

    /// Bound each attempt. A timed-out attempt counts as a failure.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backend ids in attempt order.
    pub fn ids(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.id().to_string()).collect()
    }

    /// Run `call` against each backend until one succeeds.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn SpeechBackend>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let capability = self.capability.as_str();
        let mut last_error = None;

        for (i, backend) in self.backends.iter().enumerate() {
            let provider = backend.id().to_string();
            debug!(%provider, capability, attempt = i + 1, "Calling provider");

            let outcome = bounded(&provider, self.timeout, call(backend.clone())).await;

            match outcome {
                Ok(value) => {
                    if i > 0 {
                        info!(%provider, capability, attempt = i + 1, "Failover succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        %provider,
                        capability,
                        attempt = i + 1,
                        %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::NoRoute { capability }))
    }
}

/// A voice backend whose every call is bounded by the gateway's provider timeout.
pub struct TimedVoice {
    inner: Arc<dyn VoiceBackend>,
    limit: Duration,
}

impl TimedVoice {
    /// Wrap `inner` when a limit is set; otherwise return it unchanged.
    pub fn wrap(inner: Arc<dyn VoiceBackend>, limit: Option<Duration>) -> Arc<dyn VoiceBackend> {
        match limit {
            Some(limit) => Arc::new(Self { inner, limit }),
            None => inner,
        }
    }
}

#[async_trait]
impl VoiceBackend for TimedVoice {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn clone_voice(
        &self,
        name: &str,
        description: &str,
        sample: &AudioClip,
    ) -> Result<String, ProviderError> {
        bounded(
            self.id(),
            Some(self.limit),
            self.inner.clone_voice(name, description, sample),
        )
        .await
    }

    async fn synthesize(&self, voice_id: &str, text: &str) -> Result<Bytes, ProviderError> {
        bounded(self.id(), Some(self.limit), self.inner.synthesize(voice_id, text)).await
    }

    async fn delete_voice(&self, voice_id: &str) -> Result<(), ProviderError> {
        bounded(self.id(), Some(self.limit), self.inner.delete_voice(voice_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use speech_coach_core::config::ProviderKind;
    use speech_coach_core::types::{Transcript, TranscriptSegment};

    use super::*;
    use crate::AudioClip;

    struct Scripted {
        kind: ProviderKind,
        fail: bool,
        delay: Option<Duration>,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl SpeechBackend for Scripted {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn transcribe(&self, _audio: &AudioClip) -> Result<Transcript, ProviderError> {
            self.calls.lock().unwrap().push(self.kind.as_str());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(ProviderError::Status {
                    provider: self.kind.as_str().into(),
                    status: 503,
                    body: "overloaded".into(),
                });
            }
            Ok(Transcript {
                text: self.kind.as_str().into(),
                segments: vec![TranscriptSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "hi".into(),
                }],
            })
        }
    }

    fn backend(
        kind: ProviderKind,
        fail: bool,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn SpeechBackend> {
        Arc::new(Scripted {
            kind,
            fail,
            delay: None,
            calls: calls.clone(),
        })
    }

    fn clip() -> AudioClip {
        AudioClip::new(vec![0u8; 4], "wav")
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = FailoverChain::new(
            Capability::Transcribe,
            vec![
                backend(ProviderKind::OpenAi, false, &calls),
                backend(ProviderKind::Gemini, false, &calls),
            ],
        );
        let audio = clip();
        let t = chain
            .run(|b| {
                let audio = &audio;
                async move { b.transcribe(audio).await }
            })
            .await;
        assert_eq!(t.unwrap().text, "openai");
        assert_eq!(*calls.lock().unwrap(), vec!["openai"]);
    }

    #[tokio::test]
    async fn test_falls_back_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = FailoverChain::new(
            Capability::Transcribe,
            vec![
                backend(ProviderKind::Gemini, true, &calls),
                backend(ProviderKind::OpenAi, false, &calls),
            ],
        );
        let audio = clip();
        let t = chain
            .run(|b| {
                let audio = &audio;
                async move { b.transcribe(audio).await }
            })
            .await
            .unwrap();
        assert_eq!(t.text, "openai");
        assert_eq!(*calls.lock().unwrap(), vec!["gemini", "openai"]);
    }

    #[tokio::test]
    async fn test_last_error_propagates_unmodified() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = FailoverChain::new(
            Capability::Transcribe,
            vec![
                backend(ProviderKind::OpenAi, true, &calls),
                backend(ProviderKind::Gemini, true, &calls),
            ],
        );
        let audio = clip();
        let err = chain
            .run(|b| {
                let audio = &audio;
                async move { b.transcribe(audio).await }
            })
            .await
            .unwrap_err();
        match err {
            ProviderError::Status { provider, status, .. } => {
                assert_eq!(provider, "gemini");
                assert_eq!(status, 503);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_no_route() {
        let chain = FailoverChain::new(Capability::Segment, vec![]);
        let err = chain
            .run(|_b| async { Ok::<_, ProviderError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NoRoute { capability: "segment" }));
    }

    #[tokio::test]
    async fn test_unsupported_capability_falls_through() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let chain = FailoverChain::new(
            Capability::Segment,
            vec![
                backend(ProviderKind::Gemini, false, &calls),
                backend(ProviderKind::OpenAi, false, &calls),
            ],
        );
        let transcript = Transcript::default();
        let err = chain
            .run(|b| {
                let transcript = &transcript;
                async move { b.segment(transcript, "q").await }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_advances_to_fallback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let slow: Arc<dyn SpeechBackend> = Arc::new(Scripted {
            kind: ProviderKind::Gemini,
            fail: false,
            delay: Some(Duration::from_secs(120)),
            calls: calls.clone(),
        });
        let chain = FailoverChain::new(
            Capability::Transcribe,
            vec![slow, backend(ProviderKind::OpenAi, false, &calls)],
        )
        .with_timeout(Some(Duration::from_secs(30)));
        let audio = clip();
        let t = chain
            .run(|b| {
                let audio = &audio;
                async move { b.transcribe(audio).await }
            })
            .await
            .unwrap();
        assert_eq!(t.text, "openai");
    }

    struct StalledVoice;

    #[async_trait]
    impl VoiceBackend for StalledVoice {
        fn id(&self) -> &str {
            "elevenlabs"
        }

        async fn clone_voice(
            &self,
            _name: &str,
            _description: &str,
            _sample: &AudioClip,
        ) -> Result<String, ProviderError> {
            Ok("voice_1".into())
        }

        async fn synthesize(&self, _voice_id: &str, _text: &str) -> Result<Bytes, ProviderError> {
            std::future::pending().await
        }

        async fn delete_voice(&self, _voice_id: &str) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_voice_bounds_stalled_synthesis() {
        let voice = TimedVoice::wrap(Arc::new(StalledVoice), Some(Duration::from_secs(30)));
        assert_eq!(voice.clone_voice("n", "d", &clip()).await.unwrap(), "voice_1");
        let err = voice.synthesize("voice_1", "hello").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Timeout { ref provider, secs: 30 } if provider == "elevenlabs"
        ));
        voice.delete_voice("voice_1").await.unwrap();
    }
}
