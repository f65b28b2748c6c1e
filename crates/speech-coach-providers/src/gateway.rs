//! The capability-level facade the pipeline talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use speech_coach_core::config::{Config, ProviderConfig, ProviderKind};
use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{
    ChunkFeedback, ContentChunk, GlobalEvaluation, Transcript, ViewpointExtension,
};

use crate::elevenlabs::ElevenLabsVoice;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;
use crate::{
    AudioClip, Capability, ChunkRequest, FailoverChain, ScoringScale, SpeechBackend, TimedVoice,
    VoiceBackend,
};

/// Routes each capability through its failover chain and derives scores locally.
///
/// Constructed once at startup and shared by reference; [`shutdown`](Self::shutdown)
/// disposes it.
pub struct ProviderGateway {
    routes: HashMap<Capability, FailoverChain>,
    voice: Option<Arc<dyn VoiceBackend>>,
    scale: ScoringScale,
    closed: AtomicBool,
}

#[derive(Default)]
pub struct ProviderGatewayBuilder {
    routes: HashMap<Capability, Vec<Arc<dyn SpeechBackend>>>,
    voice: Option<Arc<dyn VoiceBackend>>,
    scale: Option<ScoringScale>,
    timeout: Option<Duration>,
}

impl ProviderGatewayBuilder {
    /// Set the ordered backends for a capability (primary first).
    pub fn route(mut self, capability: Capability, backends: Vec<Arc<dyn SpeechBackend>>) -> Self {
        self.routes.insert(capability, backends);
        self
    }

    /// Use the same ordered backends for every capability.
    pub fn route_all(mut self, backends: Vec<Arc<dyn SpeechBackend>>) -> Self {
        for capability in Capability::ALL {
            self.routes.insert(capability, backends.clone());
        }
        self
    }

    pub fn voice(mut self, voice: Arc<dyn VoiceBackend>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn scale(mut self, scale: ScoringScale) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(mut self) -> ProviderGateway {
        let routes = Capability::ALL
            .into_iter()
            .map(|capability| {
                let backends = self.routes.remove(&capability).unwrap_or_default();
                let chain = FailoverChain::new(capability, backends).with_timeout(self.timeout);
                (capability, chain)
            })
            .collect();
        ProviderGateway {
            routes,
            voice: self.voice.map(|voice| TimedVoice::wrap(voice, self.timeout)),
            scale: self.scale.unwrap_or_default(),
            closed: AtomicBool::new(false),
        }
    }
}

fn build_backend(config: &ProviderConfig, max_sub_score: f64) -> Option<Arc<dyn SpeechBackend>> {
    match config.id {
        ProviderKind::OpenAi => OpenAiBackend::from_config(config, max_sub_score)
            .map(|b| Arc::new(b) as Arc<dyn SpeechBackend>),
        ProviderKind::Gemini => GeminiBackend::from_config(config, max_sub_score)
            .map(|b| Arc::new(b) as Arc<dyn SpeechBackend>),
    }
}

impl ProviderGateway {
    pub fn builder() -> ProviderGatewayBuilder {
        ProviderGatewayBuilder::default()
    }

    /// Initialize backends from config. Backends without credentials are
    /// skipped, so their slots in the routing table are dropped.
    pub fn from_config(config: &Config) -> Self {
        let scale = ScoringScale::from(&config.scoring());

        let mut backends: HashMap<ProviderKind, Arc<dyn SpeechBackend>> = HashMap::new();
        for kind in [ProviderKind::OpenAi, ProviderKind::Gemini] {
            let provider_config = config
                .provider(kind)
                .cloned()
                .unwrap_or_else(|| ProviderConfig::new(kind));
            match build_backend(&provider_config, scale.max_sub_score) {
                Some(backend) => {
                    backends.insert(kind, backend);
                }
                None => {
                    if config.provider(kind).is_some() {
                        warn!(provider = kind.as_str(), "No API key configured; backend disabled");
                    }
                }
            }
        }

        let routing = config.routing();
        let mut builder = Self::builder()
            .scale(scale)
            .timeout(config.pipeline().provider_timeout_secs.map(Duration::from_secs));
        for capability in Capability::ALL {
            let preferred = match capability {
                Capability::Transcribe => &routing.transcribe,
                Capability::EvaluateFull => &routing.evaluate_full,
                Capability::EvaluateChunk => &routing.evaluate_chunk,
                Capability::Segment => &routing.segment,
                Capability::ExtendViewpoints => &routing.extend_viewpoints,
            };
            let chain: Vec<_> = preferred
                .iter()
                .filter_map(|kind| backends.get(kind).cloned())
                .collect();
            if chain.is_empty() {
                warn!(capability = capability.as_str(), "No backend available");
            }
            builder = builder.route(capability, chain);
        }

        let voice_config = config.voice.clone().unwrap_or_default();
        if let Some(voice) = ElevenLabsVoice::from_config(&voice_config) {
            builder = builder.voice(Arc::new(voice));
        }

        let gateway = builder.build();
        for (capability, ids) in gateway.describe() {
            info!(capability, providers = ?ids, "Provider route");
        }
        info!(voice = gateway.voice.is_some(), "Provider gateway initialized");
        gateway
    }

    /// Capability name and backend ids in attempt order.
    pub fn describe(&self) -> Vec<(&'static str, Vec<String>)> {
        Capability::ALL
            .into_iter()
            .map(|c| {
                let ids = self.routes.get(&c).map(|r| r.ids()).unwrap_or_default();
                (c.as_str(), ids)
            })
            .collect()
    }

    pub fn scale(&self) -> &ScoringScale {
        &self.scale
    }

    /// Voice backend, if one is configured.
    pub fn voice(&self) -> Option<Arc<dyn VoiceBackend>> {
        if self.is_closed() {
            return None;
        }
        self.voice.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Dispose the gateway. Later calls fail with [`ProviderError::ShutDown`].
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Provider gateway shut down");
        }
    }

    fn chain(&self, capability: Capability) -> Result<&FailoverChain, ProviderError> {
        if self.is_closed() {
            return Err(ProviderError::ShutDown);
        }
        self.routes
            .get(&capability)
            .ok_or(ProviderError::NoRoute {
                capability: capability.as_str(),
            })
    }

    pub async fn transcribe(&self, audio: &AudioClip) -> Result<Transcript, ProviderError> {
        self.chain(Capability::Transcribe)?
            .run(|b| async move { b.transcribe(audio).await })
            .await
    }

    /// Holistic evaluation. Out-of-range sub-scores count as a failed attempt,
    /// so the next backend is tried.
    pub async fn evaluate_full(
        &self,
        audio: &AudioClip,
        context: &str,
    ) -> Result<GlobalEvaluation, ProviderError> {
        let scale = &self.scale;
        self.chain(Capability::EvaluateFull)?
            .run(|b| async move {
                let evaluation = b.evaluate_full(audio, context).await?;
                scale.finalize(b.id(), evaluation)
            })
            .await
    }

    pub async fn evaluate_chunk(
        &self,
        request: ChunkRequest<'_>,
    ) -> Result<ChunkFeedback, ProviderError> {
        self.chain(Capability::EvaluateChunk)?
            .run(|b| async move { b.evaluate_chunk(request).await })
            .await
    }

    pub async fn segment(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Vec<ContentChunk>, ProviderError> {
        self.chain(Capability::Segment)?
            .run(|b| async move { b.segment(transcript, context).await })
            .await
    }

    /// `None` when no backend is routed for viewpoint extension.
    pub async fn extend_viewpoints(
        &self,
        transcript: &Transcript,
        context: &str,
    ) -> Result<Option<Vec<ViewpointExtension>>, ProviderError> {
        let chain = self.chain(Capability::ExtendViewpoints)?;
        if chain.is_empty() {
            return Ok(None);
        }
        chain
            .run(|b| async move { b.extend_viewpoints(transcript, context).await })
            .await
            .map(Some)
    }
}
