//! Final report assembly.

use speech_coach_core::error::{Result, SpeechCoachError};
use speech_coach_core::types::{
    ChunkFeedback, ContentChunk, GlobalEvaluation, Report, ReportChunk, Transcript,
    ViewpointExtension,
};

pub const ANALYSIS_VERSION: &str = "2.0";

/// Settled sub-results of one run.
#[derive(Debug)]
pub struct ReportParts {
    pub global_evaluation: GlobalEvaluation,
    pub transcript: Transcript,
    pub chunks: Vec<ContentChunk>,
    pub feedback: Vec<ChunkFeedback>,
    /// Resynthesized audio per chunk; empty when voice synthesis did not run.
    pub cloned_audio: Vec<Option<String>>,
    pub viewpoint_extensions: Option<Vec<ViewpointExtension>>,
    pub audio_url: Option<String>,
}

/// Merge sub-results into one report. Chunk, feedback and audio lists must
/// line up by position.
pub fn assemble(parts: ReportParts) -> Result<Report> {
    let ReportParts {
        global_evaluation,
        transcript,
        chunks,
        feedback,
        cloned_audio,
        viewpoint_extensions,
        audio_url,
    } = parts;

    if feedback.len() != chunks.len() {
        return Err(SpeechCoachError::Validation(format!(
            "{} feedback entries for {} chunks",
            feedback.len(),
            chunks.len()
        )));
    }
    if !cloned_audio.is_empty() && cloned_audio.len() != chunks.len() {
        return Err(SpeechCoachError::Validation(format!(
            "{} resynthesized clips for {} chunks",
            cloned_audio.len(),
            chunks.len()
        )));
    }

    let mut cloned_audio = cloned_audio.into_iter();
    let chunks = chunks
        .into_iter()
        .zip(feedback)
        .enumerate()
        .map(|(position, (chunk, mut feedback))| {
            feedback.cloned_audio_url = cloned_audio.next().flatten();
            ReportChunk {
                chunk_id: position,
                chunk_type: chunk.chunk_type,
                time_range: [chunk.start, chunk.end],
                text: chunk.text,
                feedback,
            }
        })
        .collect();

    Ok(Report {
        analysis_version: ANALYSIS_VERSION.to_string(),
        global_evaluation,
        full_transcript: transcript,
        chunks,
        viewpoint_extensions,
        audio_url,
    })
}
