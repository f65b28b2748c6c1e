//! Domain model: recordings, analysis tasks, transcripts, chunks, and the report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechCoachError};

/// A speaking prompt the user answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub instruction: String,
}

/// A stored audio response. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub recording_id: String,
    pub question_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Blob store key of the stored audio.
    pub audio_key: String,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    pub fn new(question_id: &str, user_id: Option<String>, audio_key: String, recording_id: String) -> Self {
        Self {
            recording_id,
            question_id: question_id.to_string(),
            user_id,
            audio_key,
            created_at: Utc::now(),
        }
    }

    /// Generate a fresh recording id (`recording_<uuid>`).
    pub fn generate_id() -> String {
        format!("recording_{}", uuid::Uuid::new_v4().simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Forward-only transitions: pending → processing → {completed | failed}.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One analysis run over one recording.
///
/// Holds either a report (completed) or an error message (failed), never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub task_id: String,
    pub recording_id: String,
    pub question_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Report>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisTask {
    pub fn new(recording: &Recording) -> Self {
        let now = Utc::now();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            recording_id: recording.recording_id.clone(),
            question_id: recording.question_id.clone(),
            user_id: recording.user_id.clone(),
            status: TaskStatus::Pending,
            report: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SpeechCoachError::Persistence(format!(
                "task {} cannot move from {} to {}",
                self.task_id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TaskStatus::Processing)
    }

    pub fn complete(&mut self, report: Report) -> Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.report = Some(report);
        self.error_message = None;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.report = None;
        self.error_message = Some(message.into());
        Ok(())
    }
}

/// Time-aligned utterance fragment from transcription (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
}

impl Transcript {
    /// Render segments as `[start-end] text` lines for prompting.
    pub fn timestamped_lines(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("[{:.2}-{:.2}] {}", s.start, s.end, s.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    #[serde(alias = "opening_statement")]
    Opening,
    Viewpoint,
    #[serde(alias = "closing_statement")]
    Closing,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Viewpoint => "viewpoint",
            Self::Closing => "closing",
        }
    }
}

/// A content-coherent slice of the transcript produced by segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    pub chunk_id: usize,
    pub chunk_type: ChunkType,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// What an earlier chunk contributed, as seen by later chunk critiques.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorChunk {
    pub chunk_type: ChunkType,
    pub synopsis: String,
}

/// Structured critique for one chunk, with the optional resynthesized audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkFeedback {
    pub overview: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    pub corrected_text: String,
    #[serde(default)]
    pub correction_explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloned_audio_url: Option<String>,
}

/// Per-dimension sub-scores on the bounded scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub delivery: f64,
    pub language_use: f64,
    pub topic_development: f64,
}

impl SubScores {
    pub fn values(&self) -> [f64; 3] {
        [self.delivery, self.language_use, self.topic_development]
    }
}

/// Holistic evaluation as returned by a backend, before local scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullEvaluation {
    pub scores: SubScores,
    pub overall_summary: String,
    #[serde(default)]
    pub detailed_feedback: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Excellent,
    Good,
    Fair,
    Weak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvaluation {
    pub total_score: u32,
    pub score_breakdown: SubScores,
    pub level: Tier,
    pub overall_summary: String,
    pub detailed_feedback: String,
}

/// An alternative argument the speaker could have used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewpointExtension {
    pub viewpoint: String,
    #[serde(default)]
    pub supporting_points: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportChunk {
    pub chunk_id: usize,
    pub chunk_type: ChunkType,
    pub time_range: [f64; 2],
    pub text: String,
    pub feedback: ChunkFeedback,
}

/// The final, immutable analysis document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub analysis_version: String,
    pub global_evaluation: GlobalEvaluation,
    pub full_transcript: Transcript,
    pub chunks: Vec<ReportChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewpoint_extensions: Option<Vec<ViewpointExtension>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> Recording {
        Recording::new("ind_001", None, "recordings/anonymous/ind_001/r.mp3".into(), "recording_1".into())
    }

    #[test]
    fn test_status_transitions_forward_only() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_failed_task_is_absorbing() {
        let mut task = AnalysisTask::new(&recording());
        task.start().unwrap();
        task.fail("boom").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("boom"));
        assert!(task.start().is_err());
        assert!(task.fail("again").is_err());
        assert_eq!(task.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_cannot_complete_pending_task() {
        let mut task = AnalysisTask::new(&recording());
        let err = task.fail("early").unwrap_err();
        assert!(matches!(err, SpeechCoachError::Persistence(_)));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_chunk_type_accepts_backend_spellings() {
        let t: ChunkType = serde_json::from_str("\"opening_statement\"").unwrap();
        assert_eq!(t, ChunkType::Opening);
        let t: ChunkType = serde_json::from_str("\"closing_statement\"").unwrap();
        assert_eq!(t, ChunkType::Closing);
        assert_eq!(serde_json::to_string(&ChunkType::Opening).unwrap(), "\"opening\"");
    }

    #[test]
    fn test_timestamped_lines() {
        let transcript = Transcript {
            text: "Hi there. I agree.".into(),
            segments: vec![
                TranscriptSegment { start: 0.0, end: 1.5, text: " Hi there.".into() },
                TranscriptSegment { start: 1.5, end: 3.25, text: "I agree.".into() },
            ],
        };
        assert_eq!(
            transcript.timestamped_lines(),
            "[0.00-1.50] Hi there.\n[1.50-3.25] I agree."
        );
    }
}
