pub mod stats;
pub mod tasks;
pub mod users;

use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    response::Json,
    routing::get,
    Router,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::AppError;
use crate::uploads::UploadedFile;
use crate::AppState;

/// All API routes with state applied. Static file serving, CORS and tracing
/// are layered on in `main`.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/users", users::router(state.clone()))
        .nest("/api/todos", tasks::router(state.clone()))
        .nest("/api/stats", stats::router(state.clone()))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "questlog-backend",
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "users": "/api/users",
            "todos": "/api/todos",
            "stats": "/api/stats",
            "health": "/api/health"
        }
    }))
}

/// `Json` whose rejections come back as the usual `{error, status}` body.
pub(crate) struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(JsonBody(value))
    }
}

/// Reads a body that is either JSON or `multipart/form-data`.
///
/// For multipart, a part named `file_field` that carries a file name becomes
/// the upload; every other part is treated as a text field of `T`.
pub(crate) async fn read_form_or_json<T>(
    request: Request,
    file_field: &str,
) -> Result<(T, Option<UploadedFile>), AppError>
where
    T: DeserializeOwned,
{
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let JsonBody(payload) = JsonBody::<T>::from_request(request, &()).await?;
        return Ok((payload, None));
    }

    let mut multipart = Multipart::from_request(request, &()).await?;

    let mut fields = Map::new();
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field && field.file_name().is_some() {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            if !bytes.is_empty() {
                upload = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
        } else {
            let text = field.text().await?;
            fields.insert(name, Value::String(text));
        }
    }

    let payload = serde_json::from_value(Value::Object(fields))
        .map_err(|e| AppError::BadRequest(format!("Invalid form fields: {}", e)))?;
    Ok((payload, upload))
}
