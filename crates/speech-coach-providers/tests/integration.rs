//! Provider integration tests: real API calls.
//!
//! These tests are skipped when the corresponding API key env var is not set.
//! Run with: `cargo test -p speech-coach-providers --test integration`

use speech_coach_core::types::{ChunkType, Transcript, TranscriptSegment};
use speech_coach_providers::{AudioClip, ChunkRequest, SpeechBackend};
use speech_coach_providers::gemini::GeminiBackend;
use speech_coach_providers::openai::OpenAiBackend;

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn gemini_key() -> Option<String> {
    std::env::var("GEMINI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn sample_transcript() -> Transcript {
    let segments = vec![
        TranscriptSegment {
            start: 0.0,
            end: 4.0,
            text: "I prefer studying alone rather than in a group.".into(),
        },
        TranscriptSegment {
            start: 4.0,
            end: 11.0,
            text: "First, studying alone lets me control my own pace, so I can spend more time on hard topics.".into(),
        },
        TranscriptSegment {
            start: 11.0,
            end: 15.0,
            text: "That is why I think studying alone is better.".into(),
        },
    ];
    Transcript {
        text: segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        segments,
    }
}

const QUESTION: &str = "Do you prefer studying alone or in a group? Explain why.";

/// Helper to verify a segmentation result is ordered and starts with the opening.
async fn verify_segmentation(backend: &dyn SpeechBackend) {
    let chunks = backend
        .segment(&sample_transcript(), QUESTION)
        .await
        .expect("segmentation failed");
    assert!(!chunks.is_empty(), "Expected at least one chunk");
    assert_eq!(chunks[0].chunk_type, ChunkType::Opening);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_id, i);
        assert!(chunk.start <= chunk.end);
    }
}

#[tokio::test]
async fn test_openai_segmentation() {
    let Some(key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    let backend = OpenAiBackend::new(key, None);
    verify_segmentation(&backend).await;
}

#[tokio::test]
async fn test_gemini_segmentation() {
    let Some(key) = gemini_key() else {
        eprintln!("Skipping: GEMINI_API_KEY not set");
        return;
    };
    let backend = GeminiBackend::new(key, None);
    verify_segmentation(&backend).await;
}

#[tokio::test]
async fn test_gemini_viewpoint_extension() {
    let Some(key) = gemini_key() else {
        eprintln!("Skipping: GEMINI_API_KEY not set");
        return;
    };
    let backend = GeminiBackend::new(key, None);
    let viewpoints = backend
        .extend_viewpoints(&sample_transcript(), QUESTION)
        .await
        .expect("viewpoint extension failed");
    assert!(!viewpoints.is_empty());
    assert!(viewpoints.iter().all(|v| !v.viewpoint.is_empty()));
}

#[tokio::test]
async fn test_openai_bad_key_is_status_error() {
    if openai_key().is_none() {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    }
    let backend = OpenAiBackend::new("sk-invalid".into(), None);
    let err = backend
        .segment(&sample_transcript(), QUESTION)
        .await
        .unwrap_err();
    assert!(
        matches!(err, speech_coach_core::error::ProviderError::Status { status: 401, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_openai_chunk_critique_without_audio() {
    let Some(key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };
    let backend = OpenAiBackend::new(key, None);
    let audio = AudioClip::new(Vec::<u8>::new(), "mp3");
    let feedback = backend
        .evaluate_chunk(ChunkRequest {
            audio: &audio,
            text: "That is why I think studying alone is better.",
            chunk_type: ChunkType::Closing,
            prior: &[],
        })
        .await
        .expect("text-only chunk critique failed");
    assert!(!feedback.overview.is_empty());
}
