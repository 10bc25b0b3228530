//! Request handlers for the `/api` routes.

use crate::daemon::error::ApiError;
use crate::daemon::relay::StreamRelay;
use crate::daemon::server::AppState;
use crate::protocol::{
    ClearSessionRequest, ClearSessionResponse, GenerateRequest, HistoryQuery, HistoryResponse,
    SessionsResponse, SESSION_HEADER,
};
use crate::store::Role;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

/// `POST /api/generate`: stream a completion and record the exchange.
pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    if !state.ollama.check_available().await {
        return Err(ApiError::Unavailable {
            details: format!("Failed to connect to {}", state.ollama.base_url()),
        });
    }
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let requested = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok());
    let known = match requested {
        Some(id) if !id.is_empty() => state.store.contains(id).await.then(|| id.to_string()),
        _ => None,
    };
    let session_id = match known {
        Some(id) => id,
        None => state.store.create().await,
    };
    let session_id = state
        .store
        .append(&session_id, Role::User, request.prompt.clone(), None)
        .await;

    let (turns, context) = state.store.turns(&session_id).await.unwrap_or_default();
    let downstream = state.ollama.prepare(request, turns, context);
    info!(
        "Sending request to Ollama with model: {} for session: {}",
        downstream.model, session_id
    );

    let header = HeaderValue::from_str(&session_id)
        .map_err(|e| ApiError::Internal(format!("invalid session id: {}", e)))?;
    let events = state.ollama.generate(downstream);
    let frames = StreamRelay::new(Arc::clone(&state.store), session_id)
        .relay(events)
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame.to_json())));

    Ok(([(SESSION_HEADER, header)], Sse::new(frames)).into_response())
}

/// `GET /api/history?session_id=ID`
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let session_id = required_session_id(query.session_id)?;
    let history = state
        .store
        .history(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

    Ok(Json(HistoryResponse {
        session_id,
        messages: history.messages,
    }))
}

/// `GET /api/sessions`
pub async fn sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.store.list().await,
    })
}

/// `GET /api/tags`: the downstream model listing, unchanged.
pub async fn tags(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.ollama.list_models().await?))
}

/// `GET /api/config`
pub async fn frontend_config(State(state): State<AppState>) -> Json<Value> {
    Json(state.config.frontend_view())
}

/// `POST /api/clear-session`
pub async fn clear_session(
    State(state): State<AppState>,
    body: Result<Json<ClearSessionRequest>, JsonRejection>,
) -> Result<Json<ClearSessionResponse>, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!("Rejected clear-session body: {}", e.body_text());
        ApiError::BadRequest("Invalid JSON data".to_string())
    })?;
    let session_id = required_session_id(request.session_id)?;

    if !state.store.clear(&session_id).await {
        info!("Session not found: {}", session_id);
        return Err(ApiError::NotFound("Session not found".to_string()));
    }
    info!("Session cleared successfully: {}", session_id);

    Ok(Json(ClearSessionResponse {
        success: true,
        message: format!("Session {} has been cleared", session_id),
    }))
}

fn required_session_id(id: Option<String>) -> Result<String, ApiError> {
    id.filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Session ID is required".to_string()))
}
