//! Axum HTTP server.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::routes::{
    USER_HEADER, analyze_stream, download_blob, get_question, get_recording, get_task, health,
    list_questions, recording_audio,
};
use crate::state::AppState;

/// Uploads above this size are rejected before parsing.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(USER_HEADER),
        ])
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(
        &state
            .config
            .server
            .as_ref()
            .map(|s| s.cors_origins.clone())
            .unwrap_or_default(),
    );
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/analysis/stream", post(analyze_stream))
        .route("/api/v1/analysis/{task_id}", get(get_task))
        .route("/api/v1/questions", get(list_questions))
        .route("/api/v1/questions/{question_id}", get(get_question))
        .route("/api/v1/recordings/{recording_id}", get(get_recording))
        .route("/api/v1/recordings/{recording_id}/audio", get(recording_audio))
        .route("/blobs/{*key}", get(download_blob))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on the configured address until ctrl-c, then dispose the provider gateway.
pub async fn start_gateway(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server_bind(), state.config.server_port());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on http://{addr}");
    serve(listener, state, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = router(state.clone());
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    state.gateway.shutdown();
    result?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use speech_coach_core::blob::LocalBlobStore;
    use speech_coach_core::config::Config;
    use speech_coach_core::store::FileStore;
    use speech_coach_media::{TranscodePool, WavTranscoder};
    use speech_coach_providers::ProviderGateway;

    use super::*;

    fn state(dir: &std::path::Path) -> Arc<AppState> {
        Arc::new(AppState::new(
            Config::default(),
            Arc::new(ProviderGateway::builder().build()),
            Arc::new(FileStore::in_memory()),
            Arc::new(LocalBlobStore::new(dir.to_path_buf(), "http://localhost:8000", "secret")),
            TranscodePool::new(Arc::new(WavTranscoder), 1),
        ))
    }

    #[tokio::test]
    async fn test_health_lists_routes() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path()))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["routes"]["transcribe"].as_array().unwrap().is_empty());
        assert_eq!(json["voice"], false);
    }

    #[tokio::test]
    async fn test_unknown_task_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path()))
            .oneshot(
                Request::get("/api/v1/analysis/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_question_and_recording_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path()));
        for uri in ["/api/v1/questions/nope", "/api/v1/recordings/recording_nope"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_blob_without_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(state(dir.path()))
            .oneshot(
                Request::get("/blobs/recordings/a.wav?expires=1&signature=00")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
