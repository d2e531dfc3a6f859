//! Axum-based relay server.

use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use voicebridge_core::session::{LegRole, SessionId};

use crate::dispatcher::handle_leg_connection;
use crate::registry::NewSessionRequest;
use crate::state::RelayState;

/// Start the relay server.
pub async fn start_relay(state: Arc<RelayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.server_bind();
    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Relay listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws/{role}/{session_id}", get(ws_handler))
        .route("/sessions", post(create_session_handler))
        .route("/voice", post(voice_webhook))
        .route("/health", get(health_handler))
        .with_state(state)
}

async fn ws_handler(
    Path((role, session_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let Ok(role) = role.parse::<LegRole>() else {
        return (StatusCode::BAD_REQUEST, "leg role must be source or target").into_response();
    };
    let session_id = SessionId::from(session_id);

    ws.on_upgrade(move |socket| handle_leg_connection(state, socket, role, session_id))
        .into_response()
}

/// Dual-outbound entry point: create a session with full language/voice
/// configuration up front and hand the id back to the orchestrator.
async fn create_session_handler(
    State(state): State<Arc<RelayState>>,
    Json(request): Json<NewSessionRequest>,
) -> impl IntoResponse {
    let session_id = state.registry.create(&state.config, request).await;
    Json(json!({ "sessionId": session_id }))
}

/// Telephony signaling callback form. Field names follow the carrier's
/// webhook convention.
#[derive(Debug, Deserialize)]
struct VoiceWebhookForm {
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "To")]
    to: Option<String>,
    #[serde(rename = "CallStatus")]
    call_status: Option<String>,
}

/// Answer an incoming-call webhook with a connect document pointing the
/// caller's media stream at this relay's source-leg endpoint.
async fn voice_webhook(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
    Form(form): Form<VoiceWebhookForm>,
) -> impl IntoResponse {
    info!(
        call_sid = form.call_sid.as_deref().unwrap_or(""),
        from = form.from.as_deref().unwrap_or(""),
        to = form.to.as_deref().unwrap_or(""),
        status = form.call_status.as_deref().unwrap_or(""),
        "Incoming call webhook"
    );

    let session_id = state
        .registry
        .create(&state.config, NewSessionRequest::default())
        .await;

    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let ws_url = format!("wss://{host}/ws/source/{session_id}");

    let twiml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Connect>
        <ConversationRelay url="{ws_url}" />
    </Connect>
</Response>"#
    );

    ([(header::CONTENT_TYPE, "text/xml")], twiml)
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let sessions = state.registry.len().await;

    Json(json!({
        "status": "ok",
        "version": version,
        "sessions": sessions,
    }))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
