//! HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use speech_coach_core::blob::{BlobStore, content_type_for};
use speech_coach_core::error::SpeechCoachError;
use speech_coach_media::AudioFile;
use speech_coach_pipeline::AnalysisRequest;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Stand-in for an authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let routes: serde_json::Map<String, serde_json::Value> = state
        .gateway
        .describe()
        .into_iter()
        .map(|(capability, ids)| (capability.to_string(), json!(ids)))
        .collect();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "routes": routes,
        "voice": state.gateway.voice().is_some(),
    }))
}

/// `POST /api/v1/analysis/stream`: multipart `audio` + `question_id`,
/// answered with one JSON event per line until the terminal event.
pub async fn analyze_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut audio: Option<AudioFile> = None;
    let mut question_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("audio") => {
                let filename = field.file_name().map(String::from);
                let content_type = field.content_type().map(String::from);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read audio: {e}")))?;
                audio = Some(AudioFile::new(data, filename, content_type));
            }
            Some("question_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("failed to read question_id: {e}")))?;
                question_id = Some(text.trim().to_string());
            }
            other => debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    let audio = audio
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing audio file".into()))?;
    let question_id = question_id
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing question_id".into()))?;
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    info!(%question_id, user = user_id.as_deref().unwrap_or("anonymous"), bytes = audio.data.len(), "Analysis requested");

    let events = state.pipeline.start(AnalysisRequest {
        question_id,
        user_id,
        audio,
    });
    let body = Body::from_stream(
        events
            .into_stream()
            .map(|event| event.to_ndjson().map(Bytes::from)),
    );

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(response)
}

/// `GET /api/v1/questions`
pub async fn list_questions(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let questions = state.store.list_questions().await?;
    Ok(Json(json!({ "questions": questions })))
}

/// `GET /api/v1/questions/{question_id}`
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Path(question_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let question = state
        .store
        .get_question(&question_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("question {question_id} not found")))?;
    Ok(Json(question))
}

/// `GET /api/v1/recordings/{recording_id}`
pub async fn get_recording(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let recording = state
        .store
        .get_recording(&recording_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("recording {recording_id} not found")))?;
    Ok(Json(recording))
}

/// `GET /api/v1/analysis/{task_id}`
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .store
        .get_task(&task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("analysis task {task_id} not found")))?;
    Ok(Json(task))
}

/// `GET /api/v1/recordings/{recording_id}/audio`: a fresh playback URL.
pub async fn recording_audio(
    State(state): State<Arc<AppState>>,
    Path(recording_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let recording = state
        .store
        .get_recording(&recording_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("recording {recording_id} not found")))?;
    let ttl = state.presign_ttl();
    let url = state
        .blobs
        .presigned_url(&recording.audio_key, ttl)
        .await?;
    Ok(Json(json!({
        "recording_id": recording.recording_id,
        "audio_url": url,
        "expires_in": ttl.as_secs(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    expires: i64,
    signature: String,
}

/// `GET /blobs/{*key}?expires=..&signature=..`
pub async fn download_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> ApiResult<Response> {
    let now = chrono::Utc::now().timestamp();
    if !state.blobs.verify(&key, query.expires, &query.signature, now) {
        return Err(ApiError::Forbidden("invalid or expired signature".into()));
    }
    let data = state.blobs.read(&key).await.map_err(|e| match e {
        SpeechCoachError::Storage(msg) => ApiError::NotFound(msg),
        other => ApiError::Internal(other),
    })?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&key))],
        data,
    )
        .into_response())
}
