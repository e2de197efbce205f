//! HTTP surface for the client operations
//!
//! Caller identity is resolved by an upstream auth layer and forwarded in
//! the `x-user-id`, `x-user-name` and `x-user-mid` headers.

use crate::broadcast::JoinCounterBroadcaster;
use crate::facade::orchestrator::ContestOrchestrator;
use crate::facade::responses::{ApiResponse, ErrorCode};
use crate::types::{TimeSlot, User};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::{debug, warn};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_MID_HEADER: &str = "x-user-mid";

/// SSE event name for join counter batches
pub const COUNTER_EVENT: &str = "contest_counter";

#[derive(Clone)]
pub struct ContestRoutesState {
    pub orchestrator: Arc<ContestOrchestrator>,
    pub broadcaster: Arc<JoinCounterBroadcaster>,
}

#[derive(Debug, Deserialize)]
pub struct ContestListQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub contest_id: String,
    #[serde(default)]
    pub client_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRequest {
    pub contest_id: String,
    pub game_start_time: TimeSlot,
}

/// Router with the contest query and session endpoints
pub fn contest_routes(state: ContestRoutesState) -> Router {
    Router::new()
        .route("/contests", get(contest_list_handler))
        .route("/contests/{id}/prize-breakup", get(prize_breakup_handler))
        .route("/tournament/subscribe", post(subscribe_handler))
        .route("/tournament/presence", post(presence_handler))
        .route("/tournament/counter/stream", get(counter_stream_handler))
        .with_state(state)
}

/// Resolve the caller from forwarded identity headers
pub fn caller_from_headers(headers: &HeaderMap) -> Option<User> {
    let id = header_value(headers, USER_ID_HEADER)?;
    if id.is_empty() {
        return None;
    }

    let mut user = User::new(id);
    if let Some(name) = header_value(headers, USER_NAME_HEADER) {
        user.name = name;
    }
    user.mid = header_value(headers, USER_MID_HEADER).and_then(|mid| mid.parse().ok());
    Some(user)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResponse::<()>::failure(
            "Missing caller identity",
            ErrorCode::Default,
        )),
    )
        .into_response()
}

async fn contest_list_handler(
    State(state): State<ContestRoutesState>,
    Query(query): Query<ContestListQuery>,
    headers: HeaderMap,
) -> Response {
    let user_id = query
        .user_id
        .or_else(|| header_value(&headers, USER_ID_HEADER))
        .unwrap_or_default();

    Json(ApiResponse::from_result(
        state.orchestrator.contest_list(&user_id).await,
    ))
    .into_response()
}

async fn prize_breakup_handler(
    State(state): State<ContestRoutesState>,
    Path(contest_id): Path<String>,
) -> Response {
    Json(ApiResponse::from_result(
        state.orchestrator.prize_breakup(&contest_id).await,
    ))
    .into_response()
}

async fn subscribe_handler(
    State(state): State<ContestRoutesState>,
    headers: HeaderMap,
    Json(request): Json<SubscribeRequest>,
) -> Response {
    let Some(user) = caller_from_headers(&headers) else {
        return unauthorized();
    };

    if let Some(version) = &request.client_version {
        debug!("Subscribe from {} on client {}", user.id, version);
    }

    Json(ApiResponse::from_result(
        state.orchestrator.subscribe(&request.contest_id, &user).await,
    ))
    .into_response()
}

async fn presence_handler(
    State(state): State<ContestRoutesState>,
    headers: HeaderMap,
    Json(request): Json<PresenceRequest>,
) -> Response {
    let Some(user) = caller_from_headers(&headers) else {
        return unauthorized();
    };

    Json(ApiResponse::from_result(
        state
            .orchestrator
            .mark_presence(&request.contest_id, request.game_start_time, &user)
            .await,
    ))
    .into_response()
}

/// Stream every counter batch to the client as it is broadcast. Lagging
/// receivers skip the batches they missed; the next batch carries fresh totals.
async fn counter_stream_handler(State(state): State<ContestRoutesState>) -> impl IntoResponse {
    let stream =
        BroadcastStream::new(state.broadcaster.subscribe()).filter_map(|update| match update {
            Ok(update) => Some(
                Event::default()
                    .event(COUNTER_EVENT)
                    .json_data(ApiResponse::ok(update.deltas)),
            ),
            Err(e) => {
                warn!("Counter stream receiver lagged: {}", e);
                None
            }
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
