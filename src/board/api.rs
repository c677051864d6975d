use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        FromRequest, FromRequestParts, OptionalFromRequest, Path, Request, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::error;

use super::db::DbHandle;
use super::members;
use super::models::MemberRole;
use super::ws::{BoardEvent, MoveSummary, broadcast_event};
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub events: broadcast::Sender<String>,
}

impl AppState {
    fn publish(&self, event: BoardEvent) {
        broadcast_event(&self.events, &event);
    }
}

pub type SharedState = Arc<AppState>;

/// Header carrying the caller's user id. Authentication itself happens
/// upstream; this service only trusts the resolved id.
pub const USER_HEADER: &str = "x-user-id";

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
}

#[derive(Deserialize)]
pub struct UpsertBoardRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role: Option<MemberRole>,
}

#[derive(Deserialize)]
pub struct ChangeRoleRequest {
    pub role: MemberRole,
}

#[derive(Deserialize)]
pub struct ColumnRequest {
    pub title: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MoveColumnRequest {
    pub new_position: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCardRequest {
    pub column_id: i64,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCardRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MoveCardRequest {
    pub new_column_id: Option<i64>,
    pub new_position: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignUserRequest {
    pub user_id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachLabelRequest {
    pub label_id: i64,
}

#[derive(Deserialize)]
pub struct LabelRequest {
    pub title: Option<String>,
    pub color: String,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"message": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(e) if e.is_not_found() => ApiError::NotFound(e.to_string()),
            Some(e @ (BoardError::AccessDenied { .. } | BoardError::Forbidden(_))) => {
                ApiError::Forbidden(e.to_string())
            }
            Some(e @ (BoardError::InvalidTarget { .. } | BoardError::BadRequest(_))) => {
                ApiError::BadRequest(e.to_string())
            }
            _ => {
                error!(error = ?err, "request failed");
                ApiError::Internal("Internal server error".into())
            }
        }
    }
}

// ── Caller identity ───────────────────────────────────────────────────

/// Id of the registered user making the request.
pub struct CurrentUser(pub i64);

impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing or invalid X-User-Id header".into()))?;
        let user = state.db.call(move |db| db.get_user(user_id)).await?;
        match user {
            Some(user) => Ok(CurrentUser(user.id)),
            None => Err(ApiError::Unauthorized("Unknown user".into())),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

// ── Extractors with uniform rejections ───────────────────────────────

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// `Json` whose rejections render as `{"message"}` bodies. As an
/// `Option`, a request without a JSON body yields `None`.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = <Json<T> as FromRequest<S>>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

impl<S, T> OptionalFromRequest<S> for ApiJson<T>
where
    Json<T>: OptionalFromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Option<Self>, Self::Rejection> {
        let value = <Json<T> as OptionalFromRequest<S>>::from_request(req, state).await?;
        Ok(value.map(|Json(value)| ApiJson(value)))
    }
}

/// `Path` whose rejections render as `{"message"}` bodies.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = <Path<T> as FromRequestParts<S>>::from_request_parts(parts, state).await?;
        Ok(ApiPath(value))
    }
}

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/users", post(create_user))
        .route("/api/boards", get(list_boards).post(create_board))
        .route(
            "/api/boards/{board_id}",
            get(get_board).put(update_board).delete(delete_board),
        )
        .route(
            "/api/boards/{board_id}/members",
            get(list_members).post(add_member),
        )
        .route("/api/boards/{board_id}/members/leave", post(leave_board))
        .route(
            "/api/boards/{board_id}/members/{user_id}",
            delete(remove_member),
        )
        .route(
            "/api/boards/{board_id}/members/{user_id}/role",
            patch(change_member_role),
        )
        .route(
            "/api/boards/{board_id}/members/{user_id}/transfer-ownership",
            post(transfer_ownership),
        )
        .route(
            "/api/boards/{board_id}/columns",
            get(list_columns).post(create_column),
        )
        .route(
            "/api/boards/{board_id}/columns/{column_id}",
            get(get_column).put(rename_column).delete(delete_column),
        )
        .route(
            "/api/boards/{board_id}/columns/{column_id}/move",
            post(move_column),
        )
        .route(
            "/api/boards/{board_id}/cards",
            get(list_cards).post(create_card),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}",
            get(get_card).put(update_card).delete(delete_card),
        )
        .route("/api/boards/{board_id}/cards/{card_id}/move", post(move_card))
        .route(
            "/api/boards/{board_id}/cards/{card_id}/assignees",
            post(assign_user),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}/assignees/{user_id}",
            delete(unassign_user),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}/labels",
            post(attach_label),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}/labels/{label_id}",
            delete(detach_label),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/boards/{board_id}/cards/{card_id}/comments/{comment_id}",
            get(get_comment).put(update_comment).delete(delete_comment),
        )
        .route(
            "/api/boards/{board_id}/labels",
            get(list_labels).post(create_label),
        )
        .route(
            "/api/boards/{board_id}/labels/{label_id}",
            get(get_label).put(update_label).delete(delete_label),
        )
}

// ── Users & boards ────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn create_user(
    State(state): State<SharedState>,
    ApiJson(req): ApiJson<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .call(move |db| db.create_user(&req.name, &req.email))
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_boards(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let boards = state
        .db
        .call(move |db| db.list_boards_for_user(user_id))
        .await?;
    Ok(Json(boards))
}

async fn create_board(
    State(state): State<SharedState>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<UpsertBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.unwrap_or_default();
    let board = state
        .db
        .call(move |db| db.create_board(user_id, &req.title, &description))
        .await?;
    Ok((StatusCode::CREATED, Json(board)))
}

async fn get_board(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.get_board_view(board_id)
        })
        .await?;
    view.map(Json)
        .ok_or_else(|| ApiError::NotFound("Board not found".into()))
}

async fn update_board(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<UpsertBoardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.unwrap_or_default();
    let board = state
        .db
        .call(move |db| {
            members::check_manage_board(db.require_member(board_id, user_id)?)?;
            db.update_board(board_id, &req.title, &description)
        })
        .await?;
    state.publish(BoardEvent::BoardUpdated { board });
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_board(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            members::check_delete_board(db.require_member(board_id, user_id)?)?;
            db.delete_board(board_id)
        })
        .await?;
    state.publish(BoardEvent::BoardDeleted { board_id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Members ───────────────────────────────────────────────────────────

async fn list_members(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let members = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.list_members(board_id)
        })
        .await?;
    Ok(Json(members))
}

async fn add_member(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = req.role.unwrap_or(MemberRole::Member);
    let member = state
        .db
        .call(move |db| db.add_member(board_id, user_id, &req.email, role))
        .await?;
    state.publish(BoardEvent::MembersChanged { board_id });
    Ok((StatusCode::CREATED, Json(member)))
}

async fn change_member_role(
    State(state): State<SharedState>,
    ApiPath((board_id, target_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<ChangeRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.set_member_role(board_id, user_id, target_id, req.role))
        .await?;
    state.publish(BoardEvent::MembersChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_member(
    State(state): State<SharedState>,
    ApiPath((board_id, target_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.remove_member(board_id, user_id, target_id))
        .await?;
    state.publish(BoardEvent::MembersChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn transfer_ownership(
    State(state): State<SharedState>,
    ApiPath((board_id, target_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.transfer_ownership(board_id, user_id, target_id))
        .await?;
    state.publish(BoardEvent::MembersChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_board(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| db.leave_board(board_id, user_id))
        .await?;
    state.publish(BoardEvent::MembersChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Columns ───────────────────────────────────────────────────────────

async fn list_columns(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let columns = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.list_columns(board_id)
        })
        .await?;
    Ok(Json(columns))
}

async fn get_column(
    State(state): State<SharedState>,
    ApiPath((board_id, column_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.get_column_view(board_id, column_id)
        })
        .await?;
    column
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Column not found".into()))
}

async fn create_column(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<ColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.create_column(board_id, &req.title)
        })
        .await?;
    state.publish(BoardEvent::ColumnCreated {
        board_id,
        column: column.clone(),
    });
    Ok((StatusCode::CREATED, Json(column)))
}

async fn rename_column(
    State(state): State<SharedState>,
    ApiPath((board_id, column_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<ColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let column = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.rename_column(board_id, column_id, &req.title)
        })
        .await?;
    state.publish(BoardEvent::ColumnUpdated { board_id, column });
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_column(
    State(state): State<SharedState>,
    ApiPath((board_id, column_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.delete_column(board_id, column_id)
        })
        .await?;
    state.publish(BoardEvent::ColumnDeleted {
        board_id,
        column_id,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn move_column(
    State(state): State<SharedState>,
    ApiPath((board_id, column_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    req: Option<ApiJson<MoveColumnRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = req.map(|ApiJson(req)| req).unwrap_or_default();
    let outcome = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.move_column(board_id, column_id, req.new_position)
        })
        .await?;
    if !outcome.is_noop() {
        state.publish(BoardEvent::ColumnMoved {
            board_id,
            outcome: MoveSummary::from(&outcome),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── Cards ─────────────────────────────────────────────────────────────

async fn list_cards(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let cards = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.list_board_cards(board_id)
        })
        .await?;
    Ok(Json(cards))
}

async fn get_card(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let card = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.get_card_detail(board_id, card_id)
        })
        .await?;
    card.map(Json)
        .ok_or_else(|| ApiError::NotFound("Card not found".into()))
}

async fn create_card(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<CreateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.unwrap_or_default();
    let card = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.create_card(board_id, req.column_id, &req.title, &description)
        })
        .await?;
    state.publish(BoardEvent::CardCreated {
        board_id,
        card: card.clone(),
    });
    Ok((StatusCode::CREATED, Json(card)))
}

async fn update_card(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<UpdateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let description = req.description.unwrap_or_default();
    let card = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.update_card(
                board_id,
                card_id,
                &req.title,
                &description,
                req.due_date.as_deref(),
            )
        })
        .await?;
    state.publish(BoardEvent::CardUpdated { board_id, card });
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_card(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.delete_card(board_id, card_id)
        })
        .await?;
    state.publish(BoardEvent::CardDeleted { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn move_card(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    req: Option<ApiJson<MoveCardRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = req.map(|ApiJson(req)| req).unwrap_or_default();
    let outcome = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.move_card(board_id, card_id, req.new_column_id, req.new_position)
        })
        .await?;
    if !outcome.is_noop() {
        state.publish(BoardEvent::CardMoved {
            board_id,
            outcome: MoveSummary::from(&outcome),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn assign_user(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<AssignUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.assign_user(board_id, card_id, req.user_id)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn unassign_user(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id, assignee_id)): ApiPath<(i64, i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.unassign_user(board_id, card_id, assignee_id)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn attach_label(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<AttachLabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.attach_label(board_id, card_id, req.label_id)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn detach_label(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id, label_id)): ApiPath<(i64, i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.detach_label(board_id, card_id, label_id)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Comments ──────────────────────────────────────────────────────────

async fn list_comments(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let comments = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.list_comments(board_id, card_id)
        })
        .await?;
    Ok(Json(comments))
}

async fn get_comment(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id, comment_id)): ApiPath<(i64, i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.get_comment(board_id, card_id, comment_id)
        })
        .await?;
    comment
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Comment not found".into()))
}

async fn create_comment(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.create_comment(board_id, card_id, user_id, &req.content)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn update_comment(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id, comment_id)): ApiPath<(i64, i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.update_comment(board_id, card_id, comment_id, user_id, &req.content)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_comment(
    State(state): State<SharedState>,
    ApiPath((board_id, card_id, comment_id)): ApiPath<(i64, i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.delete_comment(board_id, card_id, comment_id, user_id)
        })
        .await?;
    state.publish(BoardEvent::CardDetailsChanged { board_id, card_id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Labels ────────────────────────────────────────────────────────────

async fn list_labels(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let labels = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.list_labels(board_id)
        })
        .await?;
    Ok(Json(labels))
}

async fn get_label(
    State(state): State<SharedState>,
    ApiPath((board_id, label_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let label = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.get_label(board_id, label_id)
        })
        .await?;
    label
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Label not found".into()))
}

async fn create_label(
    State(state): State<SharedState>,
    ApiPath(board_id): ApiPath<i64>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<LabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.unwrap_or_default();
    let label = state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.create_label(board_id, &title, &req.color)
        })
        .await?;
    state.publish(BoardEvent::LabelsChanged { board_id });
    Ok((StatusCode::CREATED, Json(label)))
}

async fn update_label(
    State(state): State<SharedState>,
    ApiPath((board_id, label_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
    ApiJson(req): ApiJson<LabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = req.title.unwrap_or_default();
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.update_label(board_id, label_id, &title, &req.color)
        })
        .await?;
    state.publish(BoardEvent::LabelsChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_label(
    State(state): State<SharedState>,
    ApiPath((board_id, label_id)): ApiPath<(i64, i64)>,
    CurrentUser(user_id): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .call(move |db| {
            db.require_member(board_id, user_id)?;
            db.delete_label(board_id, label_id)
        })
        .await?;
    state.publish(BoardEvent::LabelsChanged { board_id });
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────
