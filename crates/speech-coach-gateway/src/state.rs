//! Shared application state, built once at startup.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use speech_coach_core::blob::{BlobStore, LocalBlobStore};
use speech_coach_core::config::Config;
use speech_coach_core::error::Result;
use speech_coach_core::store::{AnalysisStore, FileStore};
use speech_coach_media::TranscodePool;
use speech_coach_pipeline::{PipelineOrchestrator, PipelineSettings};
use speech_coach_providers::ProviderGateway;

pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<ProviderGateway>,
    pub store: Arc<dyn AnalysisStore>,
    pub blobs: Arc<LocalBlobStore>,
    pub pipeline: PipelineOrchestrator,
}

impl AppState {
    pub fn new(
        config: Config,
        gateway: Arc<ProviderGateway>,
        store: Arc<dyn AnalysisStore>,
        blobs: Arc<LocalBlobStore>,
        transcoder: TranscodePool,
    ) -> Self {
        let pipeline = PipelineOrchestrator::new(
            gateway.clone(),
            store.clone(),
            blobs.clone() as Arc<dyn BlobStore>,
            transcoder,
            PipelineSettings::from_config(&config),
        );
        Self {
            config: Arc::new(config),
            gateway,
            store,
            blobs,
            pipeline,
        }
    }

    /// Initialize providers, the store and the blob store from config.
    pub async fn from_config(config: Config) -> Result<Self> {
        let gateway = Arc::new(ProviderGateway::from_config(&config));

        let store = match config.store_path() {
            Some(path) => FileStore::open(path).await?,
            None => {
                info!("No store path configured; analysis results are kept in memory");
                FileStore::in_memory()
            }
        };
        if config.questions.is_empty() {
            warn!("No questions configured; every analysis request will be rejected");
        } else {
            store.seed_questions(&config.questions).await?;
        }

        let secret = config.storage().resolve_signing_secret().unwrap_or_else(|| {
            warn!("No storage signing secret configured; presigned URLs expire with this process");
            uuid::Uuid::new_v4().simple().to_string()
        });
        let blobs = Arc::new(LocalBlobStore::new(
            config.blob_root(),
            config.public_base_url(),
            secret,
        ));

        let transcoder = TranscodePool::from_config(&config.pipeline());
        Ok(Self::new(config, gateway, Arc::new(store), blobs, transcoder))
    }

    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.config.storage().presign_ttl_secs)
    }
}
