//! Decoding of JSON replies from generative backends.
//!
//! Models sometimes wrap JSON in markdown fences or add prose around it, so
//! the outermost object is extracted before deserializing.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use speech_coach_core::error::ProviderError;
use speech_coach_core::types::{
    ChunkFeedback, ChunkType, ContentChunk, FullEvaluation, SubScores, ViewpointExtension,
};

/// Slice out the outermost `{...}` of a model reply.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

pub fn parse<T: DeserializeOwned>(provider: &str, text: &str) -> Result<T, ProviderError> {
    let json = extract_json(text)
        .ok_or_else(|| ProviderError::malformed(provider, "reply contains no JSON object"))?;
    serde_json::from_str(json).map_err(|e| ProviderError::malformed(provider, e))
}

/// Free text, or an object/array of comments flattened into paragraphs.
fn flatten_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(flatten_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(_, v)| flatten_text(v))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct FullEvaluationReply {
    scores: SubScores,
    #[serde(default)]
    overall_summary: String,
    #[serde(default)]
    detailed_feedback: serde_json::Value,
}

pub fn full_evaluation(provider: &str, text: &str) -> Result<FullEvaluation, ProviderError> {
    let reply: FullEvaluationReply = parse(provider, text)?;
    Ok(FullEvaluation {
        scores: reply.scores,
        overall_summary: reply.overall_summary,
        detailed_feedback: flatten_text(reply.detailed_feedback),
    })
}

pub fn chunk_feedback(provider: &str, text: &str) -> Result<ChunkFeedback, ProviderError> {
    let mut feedback: ChunkFeedback = parse(provider, text)?;
    // Synthesized audio is attached later, never by the model.
    feedback.cloned_audio_url = None;
    Ok(feedback)
}

#[derive(Deserialize)]
struct SegmentReply {
    chunks: Vec<ChunkReply>,
}

#[derive(Deserialize)]
struct ChunkReply {
    chunk_type: ChunkType,
    start: f64,
    end: f64,
    #[serde(default)]
    text: String,
}

/// Decode segmentation output, ordering chunks by start time and numbering them.
pub fn segments(provider: &str, text: &str) -> Result<Vec<ContentChunk>, ProviderError> {
    let reply: SegmentReply = parse(provider, text)?;
    let mut chunks = reply.chunks;
    for c in &chunks {
        if !(c.start.is_finite() && c.end.is_finite()) || c.start > c.end {
            return Err(ProviderError::malformed(
                provider,
                format!("invalid chunk time range [{}, {}]", c.start, c.end),
            ));
        }
    }
    chunks.sort_by(|a, b| a.start.total_cmp(&b.start));
    if chunks.windows(2).any(|w| w[1].start < w[0].end - 1e-6) {
        return Err(ProviderError::malformed(provider, "chunks overlap"));
    }
    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, c)| ContentChunk {
            chunk_id: i,
            chunk_type: c.chunk_type,
            start: c.start,
            end: c.end,
            text: c.text.trim().to_string(),
        })
        .collect())
}

#[derive(Deserialize)]
struct ViewpointReply {
    viewpoints: Vec<ViewpointExtension>,
}

pub fn viewpoints(provider: &str, text: &str) -> Result<Vec<ViewpointExtension>, ProviderError> {
    let reply: ViewpointReply = parse(provider, text)?;
    Ok(reply.viewpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_fenced_reply() {
        let text = "Here you go:\n```json\n{\"a\": {\"b\": 1}}\n```";
        assert_eq!(extract_json(text), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json"), None);
    }

    #[test]
    fn test_full_evaluation_flattens_object_feedback() {
        let text = r#"{
            "scores": {"delivery": 3.0, "language_use": 2.5, "topic_development": 3.5},
            "total_score": 99,
            "overall_summary": "Clear and confident.",
            "detailed_feedback": {"delivery_comment": "Good pace.", "language_use_comment": "Vary vocabulary."}
        }"#;
        let eval = full_evaluation("gemini", text).unwrap();
        assert_eq!(eval.scores.language_use, 2.5);
        assert_eq!(eval.detailed_feedback, "Good pace.\n\nVary vocabulary.");
    }

    #[test]
    fn test_chunk_feedback_drops_model_audio_url() {
        let text = r#"{
            "overview": "Strong opening.",
            "strengths": ["clear thesis"],
            "weaknesses": [],
            "corrected_text": "I strongly believe...",
            "correction_explanation": "Use a stronger verb.",
            "cloned_audio_url": "http://example.invalid/x.mp3"
        }"#;
        let fb = chunk_feedback("openai", text).unwrap();
        assert_eq!(fb.strengths, vec!["clear thesis"]);
        assert!(fb.cloned_audio_url.is_none());
    }

    #[test]
    fn test_segments_sorted_and_renumbered() {
        let text = r#"{"chunks": [
            {"chunk_id": 7, "chunk_type": "viewpoint", "start": 5.2, "end": 20.0, "text": " Because... "},
            {"chunk_id": 3, "chunk_type": "opening_statement", "start": 0.0, "end": 5.2, "text": "I think"}
        ]}"#;
        let chunks = segments("openai", text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].chunk_type, ChunkType::Opening);
        assert_eq!(chunks[1].chunk_id, 1);
        assert_eq!(chunks[1].text, "Because...");
    }

    #[test]
    fn test_segments_reject_bad_ranges() {
        let inverted = r#"{"chunks": [{"chunk_type": "viewpoint", "start": 4.0, "end": 1.0}]}"#;
        assert!(segments("openai", inverted).is_err());
        let overlapping = r#"{"chunks": [
            {"chunk_type": "opening", "start": 0.0, "end": 6.0},
            {"chunk_type": "viewpoint", "start": 3.0, "end": 9.0}
        ]}"#;
        assert!(segments("openai", overlapping).is_err());
    }

    #[test]
    fn test_malformed_reply() {
        let err = viewpoints("gemini", "sorry, I cannot help").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }
}
