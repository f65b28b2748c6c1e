//! Gateway integration tests: start a real server and talk to it over HTTP.
//!
//! Run with: `cargo test -p speech-coach-gateway --test integration`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use speech_coach_core::blob::LocalBlobStore;
use speech_coach_core::config::{Config, ProviderKind};
use speech_coach_core::error::ProviderError;
use speech_coach_core::store::{AnalysisStore, FileStore};
use speech_coach_core::types::{
    ChunkFeedback, ChunkType, ContentChunk, FullEvaluation, Question, SubScores, Transcript,
    TranscriptSegment,
};
use speech_coach_media::wav::pcm_to_wav;
use speech_coach_media::{TranscodePool, WavTranscoder};
use speech_coach_providers::{AudioClip, ChunkRequest, ProviderGateway, SpeechBackend};

/// Backend with canned answers for a two-second recording.
struct CannedBackend;

#[async_trait]
impl SpeechBackend for CannedBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn transcribe(&self, _audio: &AudioClip) -> Result<Transcript, ProviderError> {
        Ok(Transcript {
            text: "I prefer studying alone.".into(),
            segments: vec![TranscriptSegment {
                start: 0.0,
                end: 2.0,
                text: "I prefer studying alone.".into(),
            }],
        })
    }

    async fn evaluate_full(
        &self,
        _audio: &AudioClip,
        _context: &str,
    ) -> Result<FullEvaluation, ProviderError> {
        Ok(FullEvaluation {
            scores: SubScores {
                delivery: 5.0,
                language_use: 5.0,
                topic_development: 5.0,
            },
            overall_summary: "Short but clear.".into(),
            detailed_feedback: String::new(),
        })
    }

    async fn evaluate_chunk(&self, request: ChunkRequest<'_>) -> Result<ChunkFeedback, ProviderError> {
        Ok(ChunkFeedback {
            overview: "Direct opening.".into(),
            corrected_text: request.text.to_string(),
            ..ChunkFeedback::default()
        })
    }

    async fn segment(
        &self,
        _transcript: &Transcript,
        _context: &str,
    ) -> Result<Vec<ContentChunk>, ProviderError> {
        Ok(vec![ContentChunk {
            chunk_id: 0,
            chunk_type: ChunkType::Opening,
            start: 0.0,
            end: 2.0,
            text: "I prefer studying alone.".into(),
        }])
    }
}

/// Find an available port.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct TestGateway {
    base: String,
    store: FileStore,
    _blobs_dir: tempfile::TempDir,
}

async fn start_test_gateway() -> TestGateway {
    let port = find_free_port();
    let base = format!("http://127.0.0.1:{port}");
    let config: Config = serde_json::from_value(json!({
        "server": { "port": port },
        "storage": { "public_base_url": base },
        "pipeline": { "poll_interval_ms": 20 }
    }))
    .unwrap();

    let store = FileStore::in_memory();
    store
        .seed_questions(&[Question {
            question_id: "ind_002".into(),
            instruction: "Do you prefer to study alone or in a group?".into(),
        }])
        .await
        .unwrap();
    let blobs_dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn SpeechBackend> = Arc::new(CannedBackend);
    let state = Arc::new(speech_coach_gateway::AppState::new(
        config,
        Arc::new(ProviderGateway::builder().route_all(vec![backend]).build()),
        Arc::new(store.clone()),
        Arc::new(LocalBlobStore::new(
            blobs_dir.path().to_path_buf(),
            base.clone(),
            "test-secret",
        )),
        TranscodePool::new(Arc::new(WavTranscoder), 1),
    ));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(speech_coach_gateway::serve(
        listener,
        state,
        std::future::pending(),
    ));

    for _ in 0..50 {
        if reqwest::get(format!("{base}/health")).await.is_ok() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    TestGateway {
        base,
        store,
        _blobs_dir: blobs_dir,
    }
}

fn upload_form(question_id: Option<&str>) -> reqwest::multipart::Form {
    let samples: Vec<i16> = (0..2000).map(|i| (i % 100) as i16 * 100).collect();
    let audio = reqwest::multipart::Part::bytes(pcm_to_wav(&samples, 1000).unwrap())
        .file_name("answer.wav")
        .mime_str("audio/wav")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("audio", audio);
    match question_id {
        Some(q) => form.text("question_id", q.to_string()),
        None => form,
    }
}

async fn stream_events(
    base: &str,
    user_id: &str,
    form: reqwest::multipart::Form,
) -> (reqwest::StatusCode, reqwest::header::HeaderMap, Vec<Value>) {
    let response = reqwest::Client::new()
        .post(format!("{base}/api/v1/analysis/stream"))
        .header("x-user-id", user_id)
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.unwrap();
    let events = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    (status, headers, events)
}

#[tokio::test]
async fn test_health_endpoint() {
    let gw = start_test_gateway().await;
    let resp = reqwest::get(format!("{}/health", gw.base)).await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["routes"]["segment"], json!(["openai"]));
}

#[tokio::test]
async fn test_stream_analysis_end_to_end() {
    let gw = start_test_gateway().await;
    let (status, headers, events) =
        stream_events(&gw.base, "user_42", upload_form(Some("ind_002"))).await;

    assert_eq!(status, 200);
    assert_eq!(headers["content-type"], "application/x-ndjson");
    assert_eq!(events.len(), 9);
    assert_eq!(events[0], json!({"type": "step", "name": "uploading", "status": "start"}));
    assert_eq!(events[7], json!({"type": "step", "name": "generating", "status": "completed"}));

    let done = &events[8];
    assert_eq!(done["type"], "completed");
    assert_eq!(done["report"]["analysis_version"], "2.0");
    assert_eq!(done["report"]["global_evaluation"]["total_score"], 15);
    assert_eq!(done["report"]["global_evaluation"]["level"], "Fair");
    assert_eq!(done["report"]["chunks"][0]["chunk_type"], "opening");
    let recording_ref = done["recordingRef"].as_str().unwrap();

    // The playback URL is signed and serves the stored recording.
    let audio_url = done["audioUrl"].as_str().unwrap();
    assert!(audio_url.contains(&format!("/blobs/recordings/user_42/ind_002/{recording_ref}.wav")));
    let audio = reqwest::get(audio_url).await.unwrap();
    assert_eq!(audio.status(), 200);
    assert_eq!(audio.headers()["content-type"], "audio/wav");
    assert!(audio.bytes().await.unwrap().starts_with(b"RIFF"));

    let tampered = audio_url.replace("signature=", "signature=00");
    assert_eq!(reqwest::get(tampered).await.unwrap().status(), 403);

    // Task lookup returns the persisted report.
    let task = gw
        .store
        .get_task_for_recording(recording_ref)
        .await
        .unwrap()
        .unwrap();
    let resp = reqwest::get(format!("{}/api/v1/analysis/{}", gw.base, task.task_id))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["report"], done["report"]);

    let resp = reqwest::get(format!("{}/api/v1/recordings/{recording_ref}", gw.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["recording_id"], recording_ref);
    assert_eq!(body["question_id"], "ind_002");
    assert_eq!(body["user_id"], "user_42");

    let resp = reqwest::get(format!("{}/api/v1/recordings/{recording_ref}/audio", gw.base))
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["expires_in"], 3600);
    assert!(body["audio_url"].as_str().unwrap().contains("signature="));
}

#[tokio::test]
async fn test_unknown_question_streams_single_error() {
    let gw = start_test_gateway().await;
    let (status, _, events) = stream_events(&gw.base, "user_42", upload_form(Some("nope"))).await;
    assert_eq!(status, 200);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["step"], "uploading");
}

#[tokio::test]
async fn test_missing_question_id_is_bad_request() {
    let gw = start_test_gateway().await;
    let (status, _, events) = stream_events(&gw.base, "user_42", upload_form(None)).await;
    assert_eq!(status, 400);
    assert_eq!(events[0]["error"], "missing question_id");
}

#[tokio::test]
async fn test_unknown_recording_is_404() {
    let gw = start_test_gateway().await;
    let resp = reqwest::get(format!("{}/api/v1/recordings/recording_missing/audio", gw.base))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("recording_missing"));
}

#[tokio::test]
async fn test_question_catalog_endpoints() {
    let gw = start_test_gateway().await;
    let resp = reqwest::get(format!("{}/api/v1/questions", gw.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["questions"][0]["question_id"], "ind_002");
    assert_eq!(body["questions"].as_array().unwrap().len(), 1);

    let resp = reqwest::get(format!("{}/api/v1/questions/ind_002", gw.base)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["instruction"], "Do you prefer to study alone or in a group?");

    let resp = reqwest::get(format!("{}/api/v1/questions/ind_999", gw.base)).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_audio_url_for_user_id_with_reserved_characters() {
    let gw = start_test_gateway().await;
    let (status, _, events) =
        stream_events(&gw.base, "jo doe#2", upload_form(Some("ind_002"))).await;
    assert_eq!(status, 200);

    let done = events.last().unwrap();
    assert_eq!(done["type"], "completed");
    let audio_url = done["audioUrl"].as_str().unwrap();
    assert!(audio_url.contains("/blobs/recordings/jo%20doe%232/ind_002/"));
    let audio = reqwest::get(audio_url).await.unwrap();
    assert_eq!(audio.status(), 200);
    assert!(audio.bytes().await.unwrap().starts_with(b"RIFF"));
}
