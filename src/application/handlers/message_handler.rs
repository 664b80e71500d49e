//! HTTP ingest surface
//!
//! The chat client (or anything else) posts messages here. Processing runs
//! on its own task so a slow parser or venue never holds the request open.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::application::services::signal_processor::{ProcessOutcome, SignalProcessor};
use crate::config::SettingsHandle;
use crate::domain::entities::message::InboundMessage;
use crate::persistence::repository::SignalRepository;

/// Chat messages are small; anything bigger is not a signal
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<SignalProcessor>,
    pub settings: SettingsHandle,
    pub repo: SignalRepository,
    pub venue_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub venue: String,
    pub signals: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub channel_id: String,
    pub message_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub channels: usize,
    pub symbol_aliases: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/messages", post(ingest_message))
        .route("/config/reload", post(reload_settings))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ErrorResponse>)> {
    let signals = state.repo.count_all().await.map_err(|e| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;
    Ok(Json(HealthResponse {
        status: "running".to_string(),
        venue: state.venue_name.clone(),
        signals,
    }))
}

async fn ingest_message(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> (StatusCode, Json<AcceptedResponse>) {
    let accepted = AcceptedResponse {
        channel_id: message.channel_id.clone(),
        message_id: message.message_id,
    };

    let processor = state.processor.clone();
    tokio::spawn(async move {
        match processor.process(&message).await {
            Ok(ProcessOutcome::Dropped(reason)) => {
                info!("[{}/{}] dropped: {:?}", message.channel_id, message.message_id, reason)
            }
            Ok(outcome) => info!("[{}/{}] {:?}", message.channel_id, message.message_id, outcome),
            Err(e) => error!(
                "[{}/{}] processing failed: {}",
                message.channel_id, message.message_id, e
            ),
        }
    });

    (StatusCode::ACCEPTED, Json(accepted))
}

async fn reload_settings(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.settings.reload().await {
        Ok(settings) => Ok(Json(ReloadResponse {
            channels: settings.channels.len(),
            symbol_aliases: settings.symbol_aliases.len(),
        })),
        Err(e) => {
            error!("Settings reload failed, keeping current snapshot: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
