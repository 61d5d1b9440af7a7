use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    dto::{
        ChangePasswordRequest, LoginRequest, MessageResponse, RegisterRequest, SetActiveRequest,
        TokenResponse, UpdateProfileRequest,
    },
    extractors::{AdminUser, AuthUser},
    repo_types::{PublicProfile, UserView},
};
use crate::{
    error::ApiResult,
    extract::{ApiJson, ApiPath},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/public/:id", get(public_user))
        .route("/user/update", post(update_profile))
        .route("/user/change-password", post(change_password))
        .route("/admin/users/:id/active", patch(set_active))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<TokenResponse>)> {
    let token = state.auth.register(payload.into()).await?;
    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let token = state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip(state, identity), fields(user_id = %identity.user_id))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> ApiResult<Json<UserView>> {
    Ok(Json(state.auth.profile(identity.user_id).await?))
}

#[instrument(skip(state, identity, payload), fields(user_id = %identity.user_id))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Json<UserView>> {
    let user = state
        .auth
        .update_profile(identity.user_id, &payload.first_name, &payload.last_name, &payload.email)
        .await?;
    Ok(Json(user))
}

#[instrument(skip(state, identity, payload), fields(user_id = %identity.user_id))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ApiJson(payload): ApiJson<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .auth
        .change_password(identity.user_id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password changed",
    }))
}

#[instrument(skip(state))]
pub async fn public_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<Json<PublicProfile>> {
    Ok(Json(state.auth.public_profile(id).await?))
}

#[instrument(skip(state, admin, payload))]
pub async fn set_active(
    State(state): State<AppState>,
    admin: AdminUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<SetActiveRequest>,
) -> ApiResult<Json<UserView>> {
    let user = state.auth.set_active(id, payload.active).await?;
    info!(admin_id = %admin.0.user_id, target = %id, active = payload.active, "admin changed user status");
    Ok(Json(user))
}
