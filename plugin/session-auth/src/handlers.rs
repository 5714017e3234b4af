//! Authentication HTTP Handlers
//!
//! REST API endpoints for authentication operations.

use crate::error::AuthError;
use crate::extractors::AuthUser;
use crate::middleware;
use crate::models::*;
use crate::service::AuthService;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use validator::Validate;

/// Shared auth service state
pub type AuthState = Arc<AuthService>;

/// Mount point of the versioned API in the standalone server
pub const API_PREFIX: &str = "/api/v1";

// ============================================
// Route Builder
// ============================================

/// Create authentication routes
pub fn create_routes(auth_service: Arc<AuthService>) -> Router {
    let authenticator = Arc::new(auth_service.authenticator());

    // Public routes (no authentication required)
    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/login/verify", post(verify_login))
        .route("/auth/refresh", post(refresh_token))
        .route("/auth/otp/request", post(request_otp))
        .route("/auth/otp/resend", post(resend_otp))
        .route("/auth/otp/verify", post(verify_otp));

    // Protected routes (require authentication)
    let protected = Router::new()
        .route("/auth/me", get(get_current_user))
        .route("/user/me", get(get_current_user))
        .route_layer(axum_middleware::from_fn_with_state(
            authenticator,
            middleware::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors())
        .with_state(auth_service)
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================
// Registration
// ============================================

/// POST /auth/register
///
/// Register a new user account
pub async fn register(
    State(auth): State<AuthState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let response = auth.register(req).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

// ============================================
// Login
// ============================================

/// POST /auth/login
///
/// Authenticate user and return tokens, or announce the emailed login code
pub async fn login(
    State(auth): State<AuthState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let outcome = auth.login(req).await?;

    Ok(Json(outcome))
}

/// POST /auth/login/verify
pub async fn verify_login(
    State(auth): State<AuthState>,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let response = auth.verify_login_otp(&req.email, &req.code).await?;

    Ok(Json(response))
}

// ============================================
// Token Refresh
// ============================================

/// POST /auth/refresh
///
/// Refresh access token using refresh token
pub async fn refresh_token(
    State(auth): State<AuthState>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let response = auth.refresh(&req.refresh_token).await?;

    Ok(Json(response))
}

// ============================================
// One-Time Codes
// ============================================

/// POST /auth/otp/request
pub async fn request_otp(
    State(auth): State<AuthState>,
    Json(req): Json<OtpRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let response = auth.request_otp(&req.email).await?;

    Ok(Json(response))
}

/// POST /auth/otp/resend
pub async fn resend_otp(
    State(auth): State<AuthState>,
    Json(req): Json<OtpRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    let response = auth.resend_otp(&req.email).await?;

    Ok(Json(response))
}

/// POST /auth/otp/verify
pub async fn verify_otp(
    State(auth): State<AuthState>,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, AuthError> {
    req.validate()?;

    auth.redeem_otp(&req.email, &req.code).await?;

    Ok(Json(MessageResponse::new("Code verified")))
}

// ============================================
// User Profile
// ============================================

/// GET /auth/me
///
/// Get current user profile
pub async fn get_current_user(AuthUser(identity): AuthUser) -> impl IntoResponse {
    Json(serde_json::json!({ "user": identity }))
}
