use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::error::ProxyError;
use super::payload::{answer_text, first_image_url};
use super::AppState;
use crate::event_log::DEFAULT_RECENT_LIMIT;
use crate::fingerprint::fingerprint_data_url;

#[derive(Debug, Serialize)]
struct EventView {
    timestamp: String,
    content: String,
}

fn json_response(body: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// `POST /v1/chat/completions`
///
/// Fingerprints the first embedded image and answers from the cache when it
/// matches the previous image; otherwise forwards the untouched body to the
/// backend, remembers the reply and records its answer text.
pub async fn chat_completions(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ProxyError> {
    // Oversized or unreadable bodies get the same `{"error"}` reply as any
    // other request failure instead of axum's bare rejection.
    let body = body.map_err(|rejection| {
        ProxyError::validation(format!("Failed to read request body: {rejection}"))
    })?;
    let request: Value = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::validation(format!("Invalid JSON request body: {err}")))?;

    let image = first_image_url(&request)
        .ok_or_else(|| ProxyError::validation("No image data found in request"))?
        .to_owned();

    let fingerprint = tokio::task::spawn_blocking(move || fingerprint_data_url(&image))
        .await
        .map_err(|err| ProxyError::Internal(format!("fingerprint worker failed: {err}")))??;

    // Held until the new response is stored so concurrent requests see a
    // consistent lookup/store pair.
    let mut cache = state.cache.lock().await;

    if let Some(cached) = cache.lookup(fingerprint) {
        info!("Image too similar to previous, reusing last response");
        return Ok(json_response(cached));
    }
    info!("Image different enough ({fingerprint}), processing with backend");

    let response = state.backend.complete(body).await?;
    cache.store(fingerprint, response.clone());
    drop(cache);

    let parsed: Option<Value> = serde_json::from_slice(&response).ok();
    match parsed.as_ref().and_then(answer_text) {
        Some(answer) => {
            info!("Response from backend: {answer}");
            state.events.append(answer).await;
        }
        None => warn!("Backend response has no choices[0].message.content, not recording an event"),
    }

    Ok(json_response(response))
}

/// `GET /events`
pub async fn recent_events(State(state): State<AppState>) -> Response {
    let events: Vec<EventView> = state
        .events
        .recent(DEFAULT_RECENT_LIMIT)
        .await
        .into_iter()
        .map(|event| EventView {
            timestamp: event.formatted_timestamp(),
            content: event.content,
        })
        .collect();

    match serde_json::to_vec(&events) {
        Ok(body) => json_response(Bytes::from(body)),
        Err(err) => {
            error!("Error getting events: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
