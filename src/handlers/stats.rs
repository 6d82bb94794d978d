use axum::{extract::State, middleware, response::Json, routing::get, Extension, Router};

use crate::errors::AppError;
use crate::middleware::{require_auth, AuthUser};
use crate::models::AnalyticsResponse;
use crate::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(get_stats))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/// GET /api/stats - totals, 7-day activity, category and priority breakdowns
pub async fn get_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<AnalyticsResponse>, AppError> {
    Ok(Json(state.tasks.analytics(user.id).await?))
}
