use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post, put},
    Extension, Router,
};
use serde_json::{json, Value};

use super::{read_form_or_json, JsonBody};
use crate::errors::AppError;
use crate::middleware::{require_auth, AuthUser};
use crate::models::{AuthResponse, FocusRequest, LoginRequest, RegisterRequest, UpdateProfileRequest, User};
use crate::AppState;

/// Multipart field carrying a new profile picture.
const PROFILE_PIC_FIELD: &str = "profilePic";

pub fn router(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(get_me))
        .route("/profile", put(update_profile))
        .route("/focus", put(add_focus_minutes))
        .route("/logout", post(logout))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/", post(register))
        .route("/login", post(login))
        .merge(protected)
}

/// POST /api/users - JSON, or multipart with an optional `profilePic` file
async fn register(
    State(state): State<AppState>,
    request: Request,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let (payload, upload) =
        read_form_or_json::<RegisterRequest>(request, PROFILE_PIC_FIELD).await?;
    let response = state.users.register(payload, upload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/users/login
async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(state.users.login(payload).await?))
}

async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Json<Value> {
    state.users.logout(&user.token);
    Json(json!({ "success": true }))
}

/// GET /api/users/me
async fn get_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.me(user.id).await?))
}

/// PUT /api/users/profile - JSON, or multipart with an optional `profilePic` file
async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    request: Request,
) -> Result<Json<User>, AppError> {
    let (payload, upload) =
        read_form_or_json::<UpdateProfileRequest>(request, PROFILE_PIC_FIELD).await?;
    Ok(Json(state.users.update_profile(user.id, payload, upload).await?))
}

/// PUT /api/users/focus - add minutes spent in a focus session
async fn add_focus_minutes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    JsonBody(payload): JsonBody<FocusRequest>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.add_focus_minutes(user.id, payload).await?))
}
