use axum::{extract::DefaultBodyLimit, http::HeaderValue};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod analytics;
mod auth;
mod clock;
mod config;
mod database;
mod errors;
mod gamification;
mod handlers;
mod middleware;
mod models;
mod services;
mod store;
mod uploads;

use auth::SessionStore;
use clock::{Clock, SystemClock};
use config::Config;
use services::{TaskService, UserService};
use store::{MemoryStore, PgStore, Store};
use uploads::UploadStore;

const FALLBACK_ORIGIN: &str = "http://localhost:3000";
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskService,
    pub users: UserService,
    pub sessions: SessionStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep SQL chatter down unless RUST_LOG asks for it
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("questlog_backend=info,sqlx=warn,tower_http=info")
            }),
        )
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = database::create_pool(database_url).await?;
            if config.skip_migrations {
                warn!("⚠️ Skipping migrations due to SKIP_MIGRATIONS=true");
            } else {
                sqlx::migrate!("./migrations").run(&pool).await?;
                info!("✅ Migrations completed successfully");
            }
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("⚠️ DATABASE_URL not set, using the in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    let uploads = UploadStore::new(config.upload_dir.clone());
    let served_uploads = ServeDir::new(uploads.dir());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = SessionStore::new(Duration::from_secs(
        u64::try_from(config.session_ttl_days).unwrap_or(1) * 24 * 60 * 60,
    ));

    let state = AppState {
        tasks: TaskService::new(store.clone(), clock.clone(), uploads.clone()),
        users: UserService::new(store, clock, sessions.clone(), uploads),
        sessions: sessions.clone(),
    };

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            sessions.cleanup_expired();
        }
    });

    let app = handlers::api_router(state)
        .nest_service("/uploads", served_uploads)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config))
                .layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🚀 Server starting on http://{}", addr);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = if config.debug_mode {
        info!("🔓 Development mode: Using permissive CORS");
        CorsLayer::new().allow_origin(Any).allow_credentials(false)
    } else {
        let mut origins: Vec<HeaderValue> = Vec::new();
        for origin in &config.allowed_origins {
            match origin.parse() {
                Ok(value) => origins.push(value),
                Err(e) => warn!("⚠️ Ignoring invalid origin '{}': {}", origin, e),
            }
        }
        if origins.is_empty() {
            warn!("⚠️ No usable ALLOWED_ORIGINS, falling back to {}", FALLBACK_ORIGIN);
            origins.push(HeaderValue::from_static(FALLBACK_ORIGIN));
        }
        info!("🔒 CORS configured for {} origin(s)", origins.len());
        CorsLayer::new().allow_origin(origins).allow_credentials(true)
    };

    cors.allow_methods([
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::PUT,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ])
    .allow_headers([
        axum::http::header::CONTENT_TYPE,
        axum::http::header::AUTHORIZATION,
        axum::http::header::ACCEPT,
        axum::http::header::ORIGIN,
    ])
}
