//! HTTP boundary: thin framing over the store and the delivery stream.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use sm_crypto::b64;
use sm_proto::api::{
    ConversationsResponse, ErrorResponse, HistoryResponse, PublishBundleRequest, SendRequest,
    SendResponse,
};
use sm_store::{NewEnvelope, StoreError};

use crate::delivery::{self, DeliveryConfig};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(send_message))
        .route("/messages/history", get(history))
        .route("/conversations", get(conversations))
        .route("/ws/{device_id}", get(ws_stream))
        .route("/keys", post(publish_bundle))
        .route("/keys/{device_id}", get(fetch_bundle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(error: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse { error, code: "invalid_request".into() }),
    )
        .into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: "internal error".into(), code: "internal".into() }),
    )
        .into_response()
}

// ── Send ─────────────────────────────────────────────────────────────────────

async fn send_message(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let ciphertext = match b64::decode(&req.ciphertext) {
        Ok(bytes) => bytes,
        Err(_) => return bad_request("ciphertext is not valid base64".into()),
    };

    let result = state
        .store
        .enqueue(NewEnvelope {
            conv_id: req.conv_id,
            from_device_id: req.from_device_id,
            to_device_id: req.to_device_id,
            ciphertext,
            header: req.header,
        })
        .await;

    match result {
        Ok(row) => (
            StatusCode::CREATED,
            Json(SendResponse {
                id: row.id,
                conv_id: row.conv_id,
                to_device_id: row.to_device_id,
                sent_at: row.sent_at,
            }),
        )
            .into_response(),
        Err(StoreError::InvalidRequest(msg)) => bad_request(msg),
        Err(e) => {
            tracing::error!(error = %e, "enqueue failed");
            internal_error()
        }
    }
}

// ── History / conversations ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct HistoryParams {
    device_id: String,
    conv_id: Option<String>,
    since: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

async fn history(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Response {
    let limit = params.limit.unwrap_or(state.config.delivery_batch);
    let rows = match state
        .store
        .history(&params.device_id, params.since, params.conv_id.as_deref(), limit)
        .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "history query failed");
            return internal_error();
        }
    };

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        match row.into_frame() {
            Ok(frame) => messages.push(frame),
            Err(e) => {
                tracing::error!(error = %e, "skipping corrupt envelope row");
            }
        }
    }
    Json(HistoryResponse { messages }).into_response()
}

#[derive(Debug, Deserialize)]
struct ConversationsParams {
    device_id: String,
}

async fn conversations(
    State(state): State<AppState>,
    Query(params): Query<ConversationsParams>,
) -> Response {
    match state.store.conversations(&params.device_id).await {
        Ok(conversations) => Json(ConversationsResponse { conversations }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "conversations query failed");
            internal_error()
        }
    }
}

// ── Delivery stream ──────────────────────────────────────────────────────────

async fn ws_stream(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let store = state.store.clone();
    let registry = state.streams.clone();
    let config = DeliveryConfig {
        poll_interval: state.config.poll_interval(),
        batch: state.config.delivery_batch,
    };
    ws.on_upgrade(move |socket| delivery::run(socket, device_id, store, registry, config))
}

// ── Key directory ────────────────────────────────────────────────────────────

async fn publish_bundle(
    State(state): State<AppState>,
    Json(req): Json<PublishBundleRequest>,
) -> Response {
    let device_id = req.device_id.clone();
    let published_at = state.directory.publish(req).await;
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "device_id": device_id, "published_at": published_at })),
    )
        .into_response()
}

async fn fetch_bundle(State(state): State<AppState>, Path(device_id): Path<String>) -> Response {
    match state.directory.fetch(&device_id).await {
        Some(bundle) => Json(bundle).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: format!("unknown device {device_id}"), code: "not_found".into() }),
        )
            .into_response(),
    }
}
