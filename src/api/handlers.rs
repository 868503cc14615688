//! API request handlers.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::core::{ChannelKind, DeviceId, Recipient, RecipientId, SmartTimer, TimerId, TimerState, UserId};
use crate::engine::TimerEngine;
use crate::realtime::{Broadcaster, RealtimeFrame};
use crate::storage::Storage;

use super::errors::ApiError;
use super::responses::{
    HealthResponse, MessageResponse, PruneResponse, RecipientListResponse, TimerListResponse,
};

/// Shared application state for API handlers.
pub struct ApiState<S: Storage> {
    pub engine: Arc<TimerEngine<S>>,
    pub broadcaster: Arc<Broadcaster>,
}

impl<S: Storage> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            broadcaster: Arc::clone(&self.broadcaster),
        }
    }
}

/// Body for timer creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimerRequest {
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration: i64,
}

/// Body for the start action.
#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub duration: Option<i64>,
}

/// Body for the add-time action.
#[derive(Debug, Deserialize)]
pub struct AddTimeRequest {
    pub seconds: i64,
}

/// Body for recipient registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRecipientRequest {
    pub user_id: String,
    pub device_id: String,
    pub channel: ChannelKind,
    pub target: String,
}

/// Body for the prune maintenance action.
#[derive(Debug, Deserialize)]
pub struct PruneRequest {
    /// Terminal timers last touched before this moment are deleted.
    pub cutoff: DateTime<Utc>,
}

/// Query parameters for the timer listing.
#[derive(Debug, Default, Deserialize)]
pub struct ListTimersQuery {
    /// Comma-separated state filter, e.g. `running,paused`.
    pub state: Option<String>,
}

fn parse_timer_id(raw: &str) -> Result<TimerId, ApiError> {
    TimerId::parse(raw).map_err(|_| ApiError::NotFound(format!("timer not found: {}", raw)))
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Create a timer.
pub async fn create_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(body): Json<CreateTimerRequest>,
) -> Result<Json<SmartTimer>, ApiError> {
    let timer = state
        .engine
        .create(&body.label, body.description, body.duration)
        .await?;
    Ok(Json(timer))
}

/// List timers, optionally filtered by state.
pub async fn list_timers<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<ListTimersQuery>,
) -> Result<Json<TimerListResponse>, ApiError> {
    let timers = match query.state.as_deref() {
        None => state.engine.list().await,
        Some(filter) => {
            let mut states = Vec::new();
            for name in filter.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let state = TimerState::parse(name)
                    .ok_or_else(|| ApiError::BadRequest(format!("unknown state: {}", name)))?;
                states.push(state);
            }
            state.engine.list_by_state(&states).await
        }
    };
    let count = timers.len();
    Ok(Json(TimerListResponse { timers, count }))
}

/// Get a specific timer.
pub async fn get_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.get(&id).await?))
}

/// Start (or restart from paused) a timer.
pub async fn start_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    let duration = body.and_then(|Json(body)| body.duration);
    Ok(Json(state.engine.start_timer(&id, duration).await?))
}

/// Pause a running timer.
pub async fn pause_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.pause(&id).await?))
}

/// Resume a paused timer.
pub async fn unpause_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.unpause(&id).await?))
}

/// Adjust a timer's remaining time.
pub async fn add_time<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
    Json(body): Json<AddTimeRequest>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.add_time(&id, body.seconds).await?))
}

/// Cancel a timer.
pub async fn cancel_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.cancel(&id).await?))
}

/// Finish a timer ahead of its deadline.
pub async fn finish_timer<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<SmartTimer>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    Ok(Json(state.engine.finish(&id).await?))
}

/// Delete old terminal timers.
pub async fn prune_timers<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Json(body): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, ApiError> {
    let pruned = state.engine.prune_before(body.cutoff).await?;
    Ok(Json(PruneResponse { pruned }))
}

/// Register a notification recipient for a timer.
pub async fn add_recipient<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
    Json(body): Json<AddRecipientRequest>,
) -> Result<Json<Recipient>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    let recipient = state
        .engine
        .add_recipient(
            &id,
            UserId::new(body.user_id),
            DeviceId::new(body.device_id),
            body.channel,
            body.target,
        )
        .await?;
    Ok(Json(recipient))
}

/// List a timer's recipients.
pub async fn list_recipients<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(timer_id): Path<String>,
) -> Result<Json<RecipientListResponse>, ApiError> {
    let id = parse_timer_id(&timer_id)?;
    let recipients = state.engine.list_recipients(&id).await?;
    let count = recipients.len();
    Ok(Json(RecipientListResponse { recipients, count }))
}

/// Remove a recipient registration.
pub async fn remove_recipient<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    Path(recipient_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = RecipientId::parse(&recipient_id)
        .map_err(|_| ApiError::NotFound(format!("recipient not found: {}", recipient_id)))?;
    state.engine.remove_recipient(&id).await?;
    Ok(Json(MessageResponse {
        message: "recipient removed".to_string(),
    }))
}

/// Realtime websocket: a snapshot on connect, then a frame per update.
pub async fn realtime<S: Storage + 'static>(
    State(state): State<ApiState<S>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop<S: Storage + 'static>(mut socket: WebSocket, state: ApiState<S>) {
    let mut updates = state.broadcaster.subscribe();

    let snapshot = RealtimeFrame::Snapshot(state.engine.list().await);
    if send_frame(&mut socket, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = updates.recv() => match frame {
                Ok(frame) => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Resync a slow client with a fresh snapshot.
                    tracing::debug!(skipped, "realtime client lagged, resyncing");
                    let snapshot = RealtimeFrame::Snapshot(state.engine.list().await);
                    if send_frame(&mut socket, &snapshot).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) if text.as_str() == "snapshot" => {
                    let snapshot = RealtimeFrame::Snapshot(state.engine.list().await);
                    if send_frame(&mut socket, &snapshot).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &RealtimeFrame) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|e| {
        tracing::error!(error = %e, "failed to encode realtime frame");
    })?;
    socket.send(Message::Text(text.into())).await.map_err(|e| {
        tracing::debug!(error = %e, "realtime client disconnected");
    })
}
