//! Poll endpoints.

use axum::{Json, Router, extract::State, routing::post};
use lounge_common::AppResult;
use lounge_core::{CreatePollInput, OptionResult, PollDetails, PollOutcome};
use lounge_db::entities::poll;
use serde::{Deserialize, Serialize};

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Create poll request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub room_id: String,
    #[serde(flatten)]
    pub poll: CreatePollInput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollIdRequest {
    pub poll_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomIdRequest {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub room_id: String,
    pub limit: Option<u64>,
}

/// Vote request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: String,
    pub option_id: String,
}

/// Results after a vote.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteResponse {
    pub poll_id: String,
    pub results: Vec<OptionResult>,
}

async fn create(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreatePollRequest>,
) -> AppResult<ApiResponse<PollDetails>> {
    let created = state
        .poll_service
        .create_poll(&req.room_id, &user.user_id, req.poll)
        .await?;
    let details = state.poll_service.get_poll(&created.id).await?;
    Ok(ApiResponse::ok(details))
}

/// A poll with its current results.
async fn show(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<PollDetails>> {
    let details = state.poll_service.get_poll(&req.poll_id).await?;
    Ok(ApiResponse::ok(details))
}

/// The open poll of a room; `null` when there is none.
async fn active(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<RoomIdRequest>,
) -> AppResult<ApiResponse<Option<PollDetails>>> {
    let details = state.poll_service.get_active_poll(&req.room_id).await?;
    Ok(ApiResponse::ok(details))
}

async fn history(
    AuthUser(_user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<HistoryRequest>,
) -> AppResult<ApiResponse<Vec<poll::Model>>> {
    let polls = state
        .poll_service
        .poll_history(&req.room_id, req.limit)
        .await?;
    Ok(ApiResponse::ok(polls))
}

async fn vote(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> AppResult<ApiResponse<VoteResponse>> {
    let results = state
        .poll_service
        .cast_vote(&req.poll_id, &user.user_id, &req.option_id)
        .await?;
    Ok(ApiResponse::ok(VoteResponse {
        poll_id: req.poll_id,
        results,
    }))
}

/// Close a poll early. Creator only.
async fn close(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<PollIdRequest>,
) -> AppResult<ApiResponse<PollOutcome>> {
    let outcome = state
        .poll_service
        .close_poll(&req.poll_id, &user.user_id)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(create))
        .route("/show", post(show))
        .route("/active", post(active))
        .route("/history", post(history))
        .route("/vote", post(vote))
        .route("/close", post(close))
}
