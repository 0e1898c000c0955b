//! Login / register / profile endpoints.

use crate::auth::{
    jwt::JwtHandler,
    models::{Claims, LoginRequest, RegisterRequest, TokenResponse, UserResponse},
    user_store::UserStore,
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
}

impl AuthState {
    pub fn new(user_store: Arc<UserStore>, jwt_handler: Arc<JwtHandler>) -> Self {
        Self {
            user_store,
            jwt_handler,
        }
    }
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    if payload.name.len() < 2 || payload.email.len() < 5 || payload.password.len() < 6 {
        return Err((
            StatusCode::BAD_REQUEST,
            "Name, email or password too short".to_string(),
        ));
    }

    if state
        .user_store
        .get_user_by_email(&payload.email)
        .map_err(internal)?
        .is_some()
    {
        return Err((StatusCode::CONFLICT, "Email already registered".to_string()));
    }

    let user = state
        .user_store
        .create_user(&payload.name, &payload.email, &payload.password)
        .map_err(internal)?;

    let (token, expires_in) = state.jwt_handler.generate_token(&user).map_err(internal)?;

    info!("🔐 Registered user {}", user.email);
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in,
        user: UserResponse::from_user(&user),
    }))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    info!("🔐 Login attempt: {}", payload.email);

    let valid = state
        .user_store
        .verify_password(&payload.email, &payload.password)
        .map_err(internal)?;

    if !valid {
        warn!("❌ Failed login attempt: {}", payload.email);
        return Err((StatusCode::UNAUTHORIZED, "Invalid email or password".to_string()));
    }

    let user = state
        .user_store
        .get_user_by_email(&payload.email)
        .map_err(internal)?
        .ok_or((StatusCode::UNAUTHORIZED, "Invalid email or password".to_string()))?;

    let (token, expires_in) = state.jwt_handler.generate_token(&user).map_err(internal)?;

    info!("✅ Login successful: {}", user.email);
    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in,
        user: UserResponse::from_user(&user),
    }))
}

/// GET /api/auth/me (behind the auth middleware)
pub async fn me(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let user = state
        .user_store
        .get_user_by_id(&claims.sub)
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))?;
    Ok(Json(UserResponse::from_user(&user)))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {e}"))
}
