//! Room endpoints.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
use lounge_common::{AppError, AppResult};
use lounge_core::{CreateRoomInput, Leaderboard};
use lounge_db::entities::{room, room_message, room_participant};
use serde::{Deserialize, Serialize};

use crate::{
    extractors::AuthUser,
    middleware::AppState,
    response::{ApiResponse, no_content},
};

/// Room with its live presence.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    #[serde(flatten)]
    pub room: room::Model,
    pub online_count: usize,
}

/// Show room request. Either `roomId` or `code` is required.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowRoomRequest {
    pub room_id: Option<String>,
    pub code: Option<String>,
}

/// Request naming a room.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomIdRequest {
    pub room_id: String,
}

/// Message page request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRequest {
    pub room_id: String,
    pub limit: Option<u64>,
}

async fn room_response(state: &AppState, room: room::Model) -> RoomResponse {
    let online_count = state.room_registry.online_count(&room.id).await;
    RoomResponse { room, online_count }
}

/// Create a room hosted by the caller.
async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomInput>,
) -> AppResult<ApiResponse<RoomResponse>> {
    let room = state.room_registry.create_room(&user.user_id, req).await?;
    Ok(ApiResponse::ok(room_response(&state, room).await))
}

/// Look a room up by id or public code.
async fn show(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ShowRoomRequest>,
) -> AppResult<ApiResponse<RoomResponse>> {
    let room = match (req.room_id, req.code) {
        (Some(room_id), _) => state.room_registry.get_room(&room_id).await?,
        (None, Some(code)) => state.room_registry.get_room_by_code(&code).await?,
        (None, None) => {
            return Err(AppError::Validation(
                "roomId or code is required".to_string(),
            ));
        }
    };
    Ok(ApiResponse::ok(room_response(&state, room).await))
}

async fn participants(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RoomIdRequest>,
) -> AppResult<ApiResponse<Vec<room_participant::Model>>> {
    let participants = state.room_registry.list_participants(&req.room_id).await?;
    Ok(ApiResponse::ok(participants))
}

/// Recent messages, oldest first.
async fn messages(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<MessagesRequest>,
) -> AppResult<ApiResponse<Vec<room_message::Model>>> {
    let messages = state
        .room_registry
        .list_messages(&req.room_id, req.limit)
        .await?;
    Ok(ApiResponse::ok(messages))
}

async fn leaderboard(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RoomIdRequest>,
) -> AppResult<ApiResponse<Leaderboard>> {
    let leaderboard = state.room_registry.engagement_stats(&req.room_id).await?;
    Ok(ApiResponse::ok(leaderboard))
}

/// Delete a room. Host only.
async fn delete(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RoomIdRequest>,
) -> AppResult<impl IntoResponse> {
    state
        .room_registry
        .delete_room(&req.room_id, &user.user_id)
        .await?;
    Ok(no_content())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/show", post(show))
        .route("/participants", post(participants))
        .route("/messages", post(messages))
        .route("/leaderboard", post(leaderboard))
        .route("/delete", post(delete))
}
