use axum::{
    Router,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SearchConfig;
use crate::error::PipelineError;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::progress::ProgressHub;

pub mod handlers;
pub mod models;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Direct workspace access for the `/api/notion` routes.
    pub workspace: Collaborators,
    pub progress: ProgressHub,
    pub started_at: Instant,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(collaborators: Collaborators, config: &SearchConfig) -> Result<Self, PipelineError> {
        let orchestrator = Orchestrator::new(collaborators.clone(), config)?;
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            workspace: collaborators,
            progress: ProgressHub::new(),
            started_at: Instant::now(),
            start_time: Utc::now(),
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handlers::chat_handler))
        .route(
            "/api/chat/progress/:request_id",
            get(handlers::progress_handler),
        )
        .route("/api/notion/search", get(handlers::notion_search_handler))
        .route("/api/notion/page/:page_id", get(handlers::notion_page_handler))
        .route("/api/info", get(handlers::info_handler))
        .route("/api/health", get(handlers::health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
