//! Address subscriptions: open a channel, then follow it over SSE.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use dogewire_core::electrum::{ChannelId, SubscriptionEvent};

use super::error::AppError;
use super::wallet::{apply_upstream, parse_address, UpstreamQuery};
use super::SharedState;

#[derive(Deserialize)]
pub(super) struct SubscribeRequest {
    addresses: Vec<String>,
}

#[derive(Serialize)]
pub(super) struct SubscribeResponse {
    channel_id: ChannelId,
}

pub(super) async fn open_subscription(
    State(state): State<SharedState>,
    Query(upstream): Query<UpstreamQuery>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<Json<SubscribeResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    if request.addresses.is_empty() {
        return Err(AppError::BadRequest("addresses must not be empty".to_string()));
    }
    let addresses = request
        .addresses
        .iter()
        .map(|raw| parse_address(&state, raw))
        .collect::<Result<Vec<_>, _>>()?;

    apply_upstream(&state, &upstream).await?;
    let channel_id = state.electrum.open_subscription(addresses).await?;
    tracing::debug!(channel = %channel_id, "subscription opened");
    Ok(Json(SubscribeResponse { channel_id }))
}

/// Stream channel events. Disconnecting the client closes the channel.
pub(super) async fn stream_events(
    State(state): State<SharedState>,
    Path(channel_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let events = state.electrum.attach_stream(&ChannelId::from(channel_id))?;
    let stream = events.map(|event| {
        let name = match &event {
            SubscriptionEvent::Subscribed { .. } => "subscribed",
            SubscriptionEvent::StatusChanged { .. } => "status",
        };
        Event::default().event(name).json_data(&event)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub(super) async fn close_subscription(
    State(state): State<SharedState>,
    Path(channel_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let channel_id = ChannelId::from(channel_id);
    if state.electrum.close_subscription(&channel_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("unknown subscription channel {channel_id}")))
    }
}
