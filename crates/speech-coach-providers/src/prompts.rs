//! Prompt builders shared by the generative backends.
//!
//! Every prompt asks for a single JSON object; see [`crate::reply`] for the
//! matching decoders.

use speech_coach_core::types::{ChunkType, PriorChunk, Transcript};

pub fn full_evaluation(context: &str, max_sub_score: f64) -> String {
    format!(
        "You are an experienced speaking examiner. Listen to the recording, which \
answers the question below, and rate it.\n\n\
Question: {context}\n\n\
Rate three dimensions with whole numbers from 0 to {max_sub_score}:\n\
- delivery: pronunciation, fluency, intonation, pacing\n\
- language_use: grammar, vocabulary range, sentence variety\n\
- topic_development: relevance, coherence, support for the main idea\n\n\
Reply with JSON only:\n\
{{\"scores\": {{\"delivery\": number, \"language_use\": number, \"topic_development\": number}}, \
\"overall_summary\": \"2-3 sentences: what went well, then the main thing to improve\", \
\"detailed_feedback\": \"one paragraph per dimension\"}}\n\
Do not compute a total score."
    )
}

fn chunk_guidance(chunk_type: ChunkType) -> &'static str {
    match chunk_type {
        ChunkType::Opening => {
            "This is the opening. Judge how clearly the position is stated and how \
confidently it is delivered."
        }
        ChunkType::Viewpoint => {
            "This is a supporting viewpoint. Judge the logic of the argument, the \
specificity of its details and the fluency of delivery."
        }
        ChunkType::Closing => {
            "This is the closing. Judge whether it summarizes the argument and ties \
back to the question."
        }
    }
}

/// `with_audio` is false when the part's time range held no audio; the
/// critique then rests on the transcript alone.
pub fn chunk_critique(
    text: &str,
    chunk_type: ChunkType,
    prior: &[PriorChunk],
    with_audio: bool,
) -> String {
    let earlier = if prior.is_empty() {
        "(none, this is the first part)".to_string()
    } else {
        prior
            .iter()
            .enumerate()
            .map(|(i, p)| format!("{}. [{}] {}", i + 1, p.chunk_type.as_str(), p.synopsis))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let source = if with_audio {
        "Listen to this part of a spoken answer."
    } else {
        "No audio is available for this part of a spoken answer; judge it from its transcript."
    };
    format!(
        "You are a speaking coach. {source}\n\n\
Part type: {kind}\n{guidance}\n\n\
Reference transcript of this part: {text}\n\n\
Earlier parts of the answer (do not critique them again; flag repetition of \
points already made):\n{earlier}\n\n\
Reply with JSON only:\n\
{{\"overview\": string, \"strengths\": [string], \"weaknesses\": [string], \
\"corrected_text\": \"an improved version of this part, in the speaker's own voice\", \
\"correction_explanation\": string}}",
        kind = chunk_type.as_str(),
        guidance = chunk_guidance(chunk_type),
    )
}

pub fn segmentation(context: &str, transcript: &Transcript) -> String {
    format!(
        "Split this spoken answer into its argumentative parts.\n\n\
Rules:\n\
1. The first part is the opening (chunk_type \"opening\").\n\
2. Each following argument with its supporting details is a \"viewpoint\".\n\
3. A concluding remark at the end, if present, is a \"closing\".\n\
4. Parts are contiguous and do not overlap; use the segment timestamps for start/end.\n\
5. Each part's text is the full transcript text within its time range.\n\n\
Question: {context}\n\n\
Transcript with timestamps (seconds):\n{lines}\n\n\
Reply with JSON only:\n\
{{\"chunks\": [{{\"chunk_id\": 0, \"chunk_type\": \"opening\", \"start\": 0.0, \"end\": 5.2, \"text\": string}}]}}",
        lines = transcript.timestamped_lines(),
    )
}

pub fn viewpoint_extension(context: &str, transcript: &Transcript) -> String {
    format!(
        "A speaker answered the question below. Suggest two or three alternative \
viewpoints they could have argued, each with concrete supporting points.\n\n\
Question: {context}\n\n\
Their answer: {text}\n\n\
Reply with JSON only:\n\
{{\"viewpoints\": [{{\"viewpoint\": string, \"supporting_points\": [string]}}]}}",
        text = transcript.text.trim(),
    )
}
