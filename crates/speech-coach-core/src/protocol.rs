//! Progress event protocol streamed to the client, one JSON object per line.

use serde::{Deserialize, Serialize};

use crate::types::Report;

/// Coarse pipeline steps surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Uploading,
    Transcribing,
    Analyzing,
    Generating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Start,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Step {
        name: StepName,
        status: StepStatus,
    },
    Completed {
        report: Box<Report>,
        #[serde(rename = "recordingRef")]
        recording_ref: String,
        #[serde(rename = "audioUrl")]
        audio_url: String,
    },
    Error {
        message: String,
        step: Option<StepName>,
    },
}

impl AnalysisEvent {
    pub fn step(name: StepName, status: StepStatus) -> Self {
        Self::Step { name, status }
    }

    /// `completed` and `error` end a run; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }

    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
