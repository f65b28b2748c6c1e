//! Ordered per-chunk critique with a rolling summary of earlier chunks.

use tracing::debug;

use speech_coach_core::error::{Result, SpeechCoachError};
use speech_coach_core::types::{ChunkFeedback, ContentChunk, PriorChunk};
use speech_coach_providers::{AudioClip, ChunkRequest, ProviderGateway};

/// Synopses of the chunks critiqued so far, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RollingContext {
    entries: Vec<PriorChunk>,
    synopsis_chars: usize,
}

impl RollingContext {
    pub fn new(synopsis_chars: usize) -> Self {
        Self {
            entries: Vec::new(),
            synopsis_chars,
        }
    }

    /// Context including `chunk`, for the chunks that follow it.
    pub fn advance(mut self, chunk: &ContentChunk) -> Self {
        self.entries.push(PriorChunk {
            chunk_type: chunk.chunk_type,
            synopsis: synopsis(&chunk.text, self.synopsis_chars),
        });
        self
    }

    pub fn entries(&self) -> &[PriorChunk] {
        &self.entries
    }
}

/// First `max_chars` characters of the whitespace-normalized text, with an
/// ellipsis when cut.
pub fn synopsis(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }
    let cut: String = normalized.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

/// Critiques chunks strictly in order; each call sees only earlier chunks.
pub struct ChunkAnalysisSequencer<'a> {
    gateway: &'a ProviderGateway,
    synopsis_chars: usize,
}

impl<'a> ChunkAnalysisSequencer<'a> {
    pub fn new(gateway: &'a ProviderGateway, synopsis_chars: usize) -> Self {
        Self {
            gateway,
            synopsis_chars,
        }
    }

    /// One feedback per chunk, in chunk order. Fails on the first chunk whose
    /// critique cannot be obtained from any backend.
    pub async fn run(
        &self,
        chunks: &[ContentChunk],
        clips: &[AudioClip],
    ) -> Result<Vec<ChunkFeedback>> {
        if chunks.len() != clips.len() {
            return Err(SpeechCoachError::Validation(format!(
                "{} chunks but {} audio slices",
                chunks.len(),
                clips.len()
            )));
        }

        let mut feedback = Vec::with_capacity(chunks.len());
        let mut context = RollingContext::new(self.synopsis_chars);
        for (chunk, clip) in chunks.iter().zip(clips) {
            debug!(
                chunk = chunk.chunk_id,
                chunk_type = chunk.chunk_type.as_str(),
                prior = context.entries().len(),
                "Critiquing chunk"
            );
            let request = ChunkRequest {
                audio: clip,
                text: &chunk.text,
                chunk_type: chunk.chunk_type,
                prior: context.entries(),
            };
            feedback.push(self.gateway.evaluate_chunk(request).await?);
            context = context.advance(chunk);
        }
        Ok(feedback)
    }
}

#[cfg(test)]
mod tests {
    use speech_coach_core::types::ChunkType;

    use super::*;

    fn chunk(id: usize, chunk_type: ChunkType, text: &str) -> ContentChunk {
        ContentChunk {
            chunk_id: id,
            chunk_type,
            start: id as f64,
            end: id as f64 + 1.0,
            text: text.into(),
        }
    }

    #[test]
    fn test_synopsis_cuts_on_char_boundary() {
        assert_eq!(synopsis("  short   text ", 50), "short text");
        assert_eq!(synopsis("héllo wörld", 5), "héllo…");
        assert_eq!(synopsis("abc def", 4), "abc…");
    }

    #[test]
    fn test_context_only_grows_with_earlier_chunks() {
        let chunks = [
            chunk(0, ChunkType::Opening, "I believe homework matters."),
            chunk(1, ChunkType::Viewpoint, "First, it builds habits."),
            chunk(2, ChunkType::Closing, "So homework helps."),
        ];
        let mut seen = Vec::new();
        let mut ctx = RollingContext::new(160);
        for c in &chunks {
            seen.push(ctx.entries().to_vec());
            ctx = ctx.advance(c);
        }
        assert!(seen[0].is_empty());
        assert_eq!(seen[1].len(), 1);
        assert_eq!(seen[1][0].chunk_type, ChunkType::Opening);
        assert_eq!(seen[2].len(), 2);
        assert_eq!(seen[2][1].synopsis, "First, it builds habits.");
    }

    #[tokio::test]
    async fn test_rejects_mismatched_slices() {
        let gateway = ProviderGateway::builder().build();
        let sequencer = ChunkAnalysisSequencer::new(&gateway, 160);
        let err = sequencer
            .run(&[chunk(0, ChunkType::Opening, "x")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechCoachError::Validation(_)));
    }
}
