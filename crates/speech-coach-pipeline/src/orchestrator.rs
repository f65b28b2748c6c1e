//! The analysis stage graph.
//!
//! Holistic evaluation is forked as soon as the stored audio exists and
//! joined after the chunk pass; viewpoint extension is forked once the
//! transcript exists and joined last. Chunk critiques run strictly in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use speech_coach_core::blob::BlobStore;
use speech_coach_core::config::Config;
use speech_coach_core::error::{Result, SpeechCoachError};
use speech_coach_core::protocol::{AnalysisEvent, StepName, StepStatus};
use speech_coach_core::store::{AnalysisStore, StoreTxn};
use speech_coach_core::types::{AnalysisTask, Recording, Report};
use speech_coach_media::{AudioFile, EncodedAudio, TranscodePool};
use speech_coach_providers::{AudioClip, ProviderGateway};

use crate::channel::{EventSender, EventStream, event_channel};
use crate::report::{ReportParts, assemble};
use crate::sequencer::ChunkAnalysisSequencer;
use crate::voice::VoiceResynthesizer;

/// One spoken response to analyse.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub question_id: String,
    pub user_id: Option<String>,
    pub audio: AudioFile,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub event_buffer: usize,
    pub poll_interval: Duration,
    pub synopsis_chars: usize,
    pub presign_ttl: Duration,
    pub cancel_on_disconnect: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        let pipeline = config.pipeline();
        Self {
            event_buffer: pipeline.event_buffer,
            poll_interval: Duration::from_millis(pipeline.poll_interval_ms.max(1)),
            synopsis_chars: pipeline.synopsis_chars,
            presign_ttl: Duration::from_secs(config.storage().presign_ttl_secs),
            cancel_on_disconnect: pipeline.cancel_on_disconnect,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub task_id: String,
    pub recording_id: String,
    pub audio_url: String,
    pub report: Report,
}

/// A forked subtask, aborted if dropped before it is joined.
struct Forked<T>(JoinHandle<T>);

impl<T: Send + 'static> Forked<T> {
    fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    async fn join(mut self) -> Result<T> {
        (&mut self.0)
            .await
            .map_err(|e| SpeechCoachError::Other(anyhow::anyhow!("forked task failed: {e}")))
    }
}

impl<T> Drop for Forked<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Step bookkeeping for one run.
struct RunProgress<'a> {
    events: &'a mut EventSender,
    furthest: StepName,
    task_id: Option<String>,
}

impl RunProgress<'_> {
    async fn start(&mut self, step: StepName) {
        self.furthest = self.furthest.max(step);
        self.events
            .send(AnalysisEvent::step(step, StepStatus::Start))
            .await;
    }

    async fn complete(&mut self, step: StepName) {
        self.events
            .send(AnalysisEvent::step(step, StepStatus::Completed))
            .await;
    }
}

/// Drives one analysis run per request. Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    gateway: Arc<ProviderGateway>,
    store: Arc<dyn AnalysisStore>,
    blobs: Arc<dyn BlobStore>,
    transcoder: TranscodePool,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        store: Arc<dyn AnalysisStore>,
        blobs: Arc<dyn BlobStore>,
        transcoder: TranscodePool,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            blobs,
            transcoder,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Spawn a run and return its event stream. The run keeps going if the
    /// stream is dropped unless `cancel_on_disconnect` is set.
    pub fn start(&self, request: AnalysisRequest) -> EventStream {
        let (mut events, mut stream) =
            event_channel(self.settings.event_buffer, self.settings.poll_interval);
        let this = self.clone();
        let producer = tokio::spawn(async move {
            this.run(request, &mut events).await;
        });
        stream.attach(producer);
        stream
    }

    /// Execute one run to completion, emitting exactly one terminal event.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        events: &mut EventSender,
    ) -> Option<AnalysisOutcome> {
        let disconnect = events.disconnect_token();
        let mut progress = RunProgress {
            events,
            furthest: StepName::Uploading,
            task_id: None,
        };

        let result = tokio::select! {
            biased;
            _ = disconnect.cancelled(), if self.settings.cancel_on_disconnect => {
                Err(SpeechCoachError::Cancelled("client disconnected".into()))
            }
            result = self.execute(&request, &mut progress) => result,
        };

        match result {
            Ok(outcome) => {
                info!(
                    task_id = %outcome.task_id,
                    recording_id = %outcome.recording_id,
                    total_score = outcome.report.global_evaluation.total_score,
                    "Analysis completed"
                );
                progress
                    .events
                    .send(AnalysisEvent::Completed {
                        report: Box::new(outcome.report.clone()),
                        recording_ref: outcome.recording_id.clone(),
                        audio_url: outcome.audio_url.clone(),
                    })
                    .await;
                Some(outcome)
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    task_id = progress.task_id.as_deref().unwrap_or("-"),
                    step = ?progress.furthest,
                    error = %message,
                    "Analysis failed"
                );
                if let Some(task_id) = &progress.task_id {
                    self.mark_failed(task_id, &message).await;
                }
                progress
                    .events
                    .send(AnalysisEvent::Error {
                        message,
                        step: Some(progress.furthest),
                    })
                    .await;
                None
            }
        }
    }

    async fn execute(
        &self,
        request: &AnalysisRequest,
        progress: &mut RunProgress<'_>,
    ) -> Result<AnalysisOutcome> {
        let question = self
            .store
            .get_question(&request.question_id)
            .await?
            .ok_or_else(|| {
                SpeechCoachError::Validation(format!("question {} not found", request.question_id))
            })?;
        let context = question.instruction;

        // Ingest
        progress.start(StepName::Uploading).await;
        let stored = self.transcoder.normalize(&request.audio).await?;
        let recording = self.store_recording(request, &stored).await?;
        let mut task = AnalysisTask::new(&recording);
        task.start()?;
        self.persist_ingest(&recording, &task).await?;
        let task_id = task.task_id.clone();
        progress.task_id = Some(task_id.clone());
        info!(%task_id, recording_id = %recording.recording_id, "Analysis task created");
        progress.complete(StepName::Uploading).await;

        // Fork A: holistic evaluation runs in the background until the chunk pass is done.
        progress.start(StepName::Transcribing).await;
        let full_audio = AudioClip::new(stored.data.clone(), stored.format.clone());
        let holistic = {
            let gateway = self.gateway.clone();
            let audio = full_audio.clone();
            let context = context.clone();
            Forked::spawn(async move { gateway.evaluate_full(&audio, &context).await })
        };
        let upload = AudioClip::new(request.audio.data.clone(), request.audio.extension());
        let transcript = self.gateway.transcribe(&upload).await?;
        progress.complete(StepName::Transcribing).await;

        // Fork B: viewpoint extension only needs the transcript.
        progress.start(StepName::Analyzing).await;
        let extension = {
            let gateway = self.gateway.clone();
            let transcript = transcript.clone();
            let context = context.clone();
            Forked::spawn(async move { gateway.extend_viewpoints(&transcript, &context).await })
        };
        let chunks = self.gateway.segment(&transcript, &context).await?;
        let ranges: Vec<(f64, f64)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        let clips: Vec<AudioClip> = self
            .transcoder
            .slice_chunks(&stored, &ranges)
            .await?
            .into_iter()
            .map(|slice| AudioClip::new(slice.data, slice.format))
            .collect();
        let feedback = ChunkAnalysisSequencer::new(&self.gateway, self.settings.synopsis_chars)
            .run(&chunks, &clips)
            .await?;
        // Join A
        let global_evaluation = holistic.join().await??;
        progress.complete(StepName::Analyzing).await;

        progress.start(StepName::Generating).await;
        // Fork C: best effort, never fails the run.
        let cloned_audio = VoiceResynthesizer::new(
            self.gateway.voice(),
            self.blobs.clone(),
            self.settings.presign_ttl,
        )
        .run(&recording, &full_audio, &feedback)
        .await;
        // Join B
        let viewpoint_extensions = extension.join().await??;

        let audio_url = self
            .blobs
            .presigned_url(&recording.audio_key, self.settings.presign_ttl)
            .await?;
        let report = assemble(ReportParts {
            global_evaluation,
            transcript,
            chunks,
            feedback,
            cloned_audio,
            viewpoint_extensions,
            audio_url: Some(audio_url.clone()),
        })?;
        self.persist_completion(&task_id, report.clone()).await?;
        progress.complete(StepName::Generating).await;

        Ok(AnalysisOutcome {
            task_id,
            recording_id: recording.recording_id,
            audio_url,
            report,
        })
    }

    async fn store_recording(
        &self,
        request: &AnalysisRequest,
        stored: &EncodedAudio,
    ) -> Result<Recording> {
        let recording_id = Recording::generate_id();
        let owner = request.user_id.as_deref().unwrap_or("anonymous");
        let key = format!(
            "recordings/{owner}/{}/{recording_id}.{}",
            request.question_id, stored.format
        );
        self.blobs
            .put(&key, stored.data.clone(), stored.content_type())
            .await?;
        Ok(Recording::new(
            &request.question_id,
            request.user_id.clone(),
            key,
            recording_id,
        ))
    }

    /// Recording and processing task in one transaction, committed before any AI call.
    async fn persist_ingest(&self, recording: &Recording, task: &AnalysisTask) -> Result<()> {
        let mut txn = self.store.begin().await?;
        let staged = async {
            txn.create_recording(recording.clone()).await?;
            txn.create_task(task.clone()).await
        }
        .await;
        commit_or_rollback(txn, staged).await
    }

    async fn persist_completion(&self, task_id: &str, report: Report) -> Result<()> {
        let mut txn = self.store.begin().await?;
        let staged = txn.mark_completed(task_id, report).await;
        commit_or_rollback(txn, staged).await
    }

    /// Best effort: a failure here is logged and swallowed.
    async fn mark_failed(&self, task_id: &str, message: &str) {
        let result = async {
            let mut txn = self.store.begin().await?;
            let staged = txn.mark_failed(task_id, message).await;
            commit_or_rollback(txn, staged).await
        }
        .await;
        if let Err(e) = result {
            warn!(task_id, error = %e, "Could not mark task failed");
        }
    }
}

async fn commit_or_rollback(txn: Box<dyn StoreTxn>, staged: Result<()>) -> Result<()> {
    match staged {
        Ok(()) => txn.commit().await,
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
