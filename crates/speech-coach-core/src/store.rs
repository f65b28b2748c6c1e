//! Transactional persistence for recordings and analysis tasks.
//!
//! Writes are staged on a [`StoreTxn`] and applied all-or-nothing on commit.
//! Dropping a transaction without committing discards its staged writes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SpeechCoachError};
use crate::types::{AnalysisTask, Question, Recording, Report};

/// Read side of the persistence adapter plus the entry point for writes.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// The question catalog, ordered by id.
    async fn list_questions(&self) -> Result<Vec<Question>>;

    async fn get_question(&self, question_id: &str) -> Result<Option<Question>>;

    async fn get_recording(&self, recording_id: &str) -> Result<Option<Recording>>;

    async fn get_task(&self, task_id: &str) -> Result<Option<AnalysisTask>>;

    /// The task analysing a recording (at most one exists).
    async fn get_task_for_recording(&self, recording_id: &str) -> Result<Option<AnalysisTask>>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTxn>>;
}

/// A unit of staged writes.
#[async_trait]
pub trait StoreTxn: Send {
    async fn create_recording(&mut self, recording: Recording) -> Result<()>;

    async fn create_task(&mut self, task: AnalysisTask) -> Result<()>;

    async fn mark_completed(&mut self, task_id: &str, report: Report) -> Result<()>;

    async fn mark_failed(&mut self, task_id: &str, message: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    questions: BTreeMap<String, Question>,
    #[serde(default)]
    recordings: BTreeMap<String, Recording>,
    #[serde(default)]
    tasks: BTreeMap<String, AnalysisTask>,
}

#[derive(Debug)]
enum StagedOp {
    CreateRecording(Recording),
    CreateTask(AnalysisTask),
    MarkCompleted { task_id: String, report: Box<Report> },
    MarkFailed { task_id: String, message: String },
}

impl StoreState {
    fn apply(&mut self, op: StagedOp) -> Result<()> {
        match op {
            StagedOp::CreateRecording(recording) => {
                if self.recordings.contains_key(&recording.recording_id) {
                    return Err(SpeechCoachError::Persistence(format!(
                        "recording {} already exists",
                        recording.recording_id
                    )));
                }
                self.recordings
                    .insert(recording.recording_id.clone(), recording);
            }
            StagedOp::CreateTask(task) => {
                if !self.recordings.contains_key(&task.recording_id) {
                    return Err(SpeechCoachError::Persistence(format!(
                        "task {} references unknown recording {}",
                        task.task_id, task.recording_id
                    )));
                }
                if self
                    .tasks
                    .values()
                    .any(|t| t.recording_id == task.recording_id)
                {
                    return Err(SpeechCoachError::Persistence(format!(
                        "recording {} already has a task",
                        task.recording_id
                    )));
                }
                self.tasks.insert(task.task_id.clone(), task);
            }
            StagedOp::MarkCompleted { task_id, report } => {
                self.task_mut(&task_id)?.complete(*report)?;
            }
            StagedOp::MarkFailed { task_id, message } => {
                self.task_mut(&task_id)?.fail(message)?;
            }
        }
        Ok(())
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut AnalysisTask> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| SpeechCoachError::Persistence(format!("task {task_id} not found")))
    }
}

struct Inner {
    path: Option<PathBuf>,
    state: Mutex<StoreState>,
}

impl Inner {
    async fn persist(&self, state: &StoreState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_string_pretty(state)?;
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Store backed by memory, optionally mirrored to a JSON file.
///
/// Layout: `<path>` holds `{questions, recordings, tasks}` keyed by id.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Inner {
                path: None,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Open (or create on first commit) a JSON-file store.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let data = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&data).map_err(|e| {
                SpeechCoachError::Persistence(format!("corrupt store {}: {e}", path.display()))
            })?
        } else {
            StoreState::default()
        };
        debug!(
            path = %path.display(),
            tasks = state.tasks.len(),
            "Opened analysis store"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                path: Some(path),
                state: Mutex::new(state),
            }),
        })
    }

    /// Default store location: `~/.speech_coach/store.json`
    pub fn default_path() -> PathBuf {
        crate::config::data_dir().join("store.json")
    }

    /// Replace the question catalog.
    pub async fn seed_questions(&self, questions: &[Question]) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.questions = questions
            .iter()
            .map(|q| (q.question_id.clone(), q.clone()))
            .collect();
        self.inner.persist(&state).await
    }
}

#[async_trait]
impl AnalysisStore for FileStore {
    async fn list_questions(&self) -> Result<Vec<Question>> {
        Ok(self.inner.state.lock().await.questions.values().cloned().collect())
    }

    async fn get_question(&self, question_id: &str) -> Result<Option<Question>> {
        Ok(self.inner.state.lock().await.questions.get(question_id).cloned())
    }

    async fn get_recording(&self, recording_id: &str) -> Result<Option<Recording>> {
        Ok(self
            .inner
            .state
            .lock()
            .await
            .recordings
            .get(recording_id)
            .cloned())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<AnalysisTask>> {
        Ok(self.inner.state.lock().await.tasks.get(task_id).cloned())
    }

    async fn get_task_for_recording(&self, recording_id: &str) -> Result<Option<AnalysisTask>> {
        Ok(self
            .inner
            .state
            .lock()
            .await
            .tasks
            .values()
            .find(|t| t.recording_id == recording_id)
            .cloned())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        Ok(Box::new(FileTxn {
            inner: self.inner.clone(),
            staged: Vec::new(),
        }))
    }
}

struct FileTxn {
    inner: Arc<Inner>,
    staged: Vec<StagedOp>,
}

#[async_trait]
impl StoreTxn for FileTxn {
    async fn create_recording(&mut self, recording: Recording) -> Result<()> {
        self.staged.push(StagedOp::CreateRecording(recording));
        Ok(())
    }

    async fn create_task(&mut self, task: AnalysisTask) -> Result<()> {
        self.staged.push(StagedOp::CreateTask(task));
        Ok(())
    }

    async fn mark_completed(&mut self, task_id: &str, report: Report) -> Result<()> {
        self.staged.push(StagedOp::MarkCompleted {
            task_id: task_id.to_string(),
            report: Box::new(report),
        });
        Ok(())
    }

    async fn mark_failed(&mut self, task_id: &str, message: &str) -> Result<()> {
        self.staged.push(StagedOp::MarkFailed {
            task_id: task_id.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let FileTxn { inner, staged } = *self;
        let mut state = inner.state.lock().await;
        let mut next = state.clone();
        let ops = staged.len();
        for op in staged {
            next.apply(op)?;
        }
        inner.persist(&next).await?;
        *state = next;
        debug!(ops, "Committed store transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        debug!(ops = self.staged.len(), "Rolled back store transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    fn recording() -> Recording {
        Recording::new(
            "ind_001",
            Some("u1".into()),
            "recordings/u1/ind_001/recording_a.mp3".into(),
            "recording_a".into(),
        )
    }

    fn processing_task(rec: &Recording) -> AnalysisTask {
        let mut task = AnalysisTask::new(rec);
        task.start().unwrap();
        task
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = FileStore::in_memory();
        let rec = recording();
        let task = processing_task(&rec);
        let task_id = task.task_id.clone();

        let mut txn = store.begin().await.unwrap();
        txn.create_recording(rec).await.unwrap();
        txn.create_task(task).await.unwrap();
        assert!(store.get_task(&task_id).await.unwrap().is_none());
        txn.commit().await.unwrap();

        let loaded = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert!(store.get_recording("recording_a").await.unwrap().is_some());
        let by_recording = store.get_task_for_recording("recording_a").await.unwrap().unwrap();
        assert_eq!(by_recording.task_id, task_id);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = FileStore::in_memory();
        let rec = recording();
        let task = processing_task(&rec);
        let task_id = task.task_id.clone();

        let mut txn = store.begin().await.unwrap();
        txn.create_recording(rec).await.unwrap();
        txn.create_task(task).await.unwrap();
        txn.rollback().await.unwrap();

        assert!(store.get_task(&task_id).await.unwrap().is_none());
        assert!(store.get_recording("recording_a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_is_all_or_nothing() {
        let store = FileStore::in_memory();
        let rec = recording();
        let task = processing_task(&rec);
        let task_id = task.task_id.clone();

        let mut txn = store.begin().await.unwrap();
        txn.create_recording(rec).await.unwrap();
        txn.create_task(task).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        txn.mark_failed(&task_id, "first").await.unwrap();
        txn.mark_failed(&task_id, "second").await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(matches!(err, SpeechCoachError::Persistence(_)));

        let loaded = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Processing);
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_list_questions_sorted_by_id() {
        let store = FileStore::in_memory();
        assert!(store.list_questions().await.unwrap().is_empty());
        store
            .seed_questions(&[
                Question {
                    question_id: "ind_002".into(),
                    instruction: "Study alone or in a group?".into(),
                },
                Question {
                    question_id: "ind_001".into(),
                    instruction: "Describe a mentor.".into(),
                },
            ])
            .await
            .unwrap();
        let ids: Vec<String> = store
            .list_questions()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.question_id)
            .collect();
        assert_eq!(ids, vec!["ind_001", "ind_002"]);
    }

    #[tokio::test]
    async fn test_task_requires_recording() {
        let store = FileStore::in_memory();
        let task = processing_task(&recording());
        let mut txn = store.begin().await.unwrap();
        txn.create_task(task).await.unwrap();
        assert!(txn.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let rec = recording();
        let task = processing_task(&rec);
        let task_id = task.task_id.clone();

        {
            let store = FileStore::open(path.clone()).await.unwrap();
            store
                .seed_questions(&[Question {
                    question_id: "ind_001".into(),
                    instruction: "Describe a mentor.".into(),
                }])
                .await
                .unwrap();
            let mut txn = store.begin().await.unwrap();
            txn.create_recording(rec).await.unwrap();
            txn.create_task(task).await.unwrap();
            txn.commit().await.unwrap();
        }

        let store = FileStore::open(path).await.unwrap();
        assert!(store.get_question("ind_001").await.unwrap().is_some());
        let loaded = store.get_task(&task_id).await.unwrap().unwrap();
        assert_eq!(loaded.recording_id, "recording_a");
    }
}
