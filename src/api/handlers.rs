use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::collaborators::ProgressSink;
use crate::error::{CollaboratorError, PipelineError};
use crate::progress::ProgressHub;

use super::AppState;
use super::models::{
    ApiResponse, ChatData, ChatRequest, ChatResponse, ErrorResponse, HealthResponse, InfoData,
    NotionPageData, NotionSearchData, SearchParams,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Cancels an unfinished run and drops its progress listener when the
/// handler future is dropped.
struct RunGuard {
    cancel: CancellationToken,
    progress: ProgressHub,
    request_id: Option<String>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.cancel.cancel();
        if let Some(id) = self.request_id.as_deref() {
            self.progress.remove(id);
        }
        tracing::info!(request_id = ?self.request_id, "chat request dropped, run cancelled");
    }
}

pub async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Message cannot be empty", None)),
        ));
    }

    tracing::info!(request_id = ?request.request_id, "chat query received");

    let cancel = CancellationToken::new();
    let guard = RunGuard {
        cancel: cancel.clone(),
        progress: state.progress.clone(),
        request_id: request.request_id.clone(),
        finished: false,
    };

    let sink = request
        .request_id
        .as_deref()
        .map(|id| state.progress.sink(id));
    let result = state
        .orchestrator
        .run(
            message,
            sink.as_ref().map(|s| s as &dyn ProgressSink),
            &cancel,
        )
        .await;
    guard.finish();

    match result {
        Ok(result) => {
            if let Some(id) = request.request_id.as_deref() {
                state.progress.complete(id);
            }
            Ok(Json(ChatResponse {
                success: true,
                data: ChatData {
                    response: result.response,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                    metadata: result.metadata,
                },
            }))
        }
        Err(e) => {
            if let Some(id) = request.request_id.as_deref() {
                state.progress.remove(id);
            }
            tracing::error!(error = %e, "chat query failed");
            let status = match &e {
                PipelineError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((
                status,
                Json(ErrorResponse::new(
                    "Failed to process the query",
                    Some(e.to_string()),
                )),
            ))
        }
    }
}

pub async fn progress_handler(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let stream = state
        .progress
        .subscribe(&request_id)
        .map(|message| Event::default().json_data(message));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub async fn notion_search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<ApiResponse<NotionSearchData>>, ApiError> {
    let query = params.q.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Query parameter q is required", None)),
        ));
    }

    tracing::info!(query, limit = params.limit, "workspace search");
    let mut results = state.workspace.search.search(query).await.map_err(|e| {
        tracing::error!(error = %e, "workspace search failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("Search failed", Some(e.to_string()))),
        )
    })?;

    let total = results.len();
    results.truncate(params.limit);
    Ok(Json(ApiResponse::ok(NotionSearchData {
        query: query.to_string(),
        returned: results.len(),
        results,
        total,
    })))
}

pub async fn notion_page_handler(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Json<ApiResponse<NotionPageData>>, ApiError> {
    let page_id = clean_page_id(&page_id);
    if page_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Page id is required", None)),
        ));
    }

    tracing::info!(page_id = %page_id, "workspace page fetch");
    let workspace = &state.workspace;
    let (page, content) = futures::future::try_join(
        workspace.metadata.page_info(&page_id),
        workspace.text.page_content(&page_id),
    )
    .await
    .map_err(|e| {
        tracing::error!(page_id = %page_id, error = %e, "workspace page fetch failed");
        match e {
            CollaboratorError::Api { status: 404, .. } => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Page not found", None)),
            ),
            e => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(
                    "Failed to fetch page content",
                    Some(e.to_string()),
                )),
            ),
        }
    })?;

    Ok(Json(ApiResponse::ok(NotionPageData {
        page,
        content_length: content.chars().count(),
        content,
    })))
}

/// Accepts a bare id, a dashed id, or a page URL whose last segment ends in
/// the 32-character id.
pub fn clean_page_id(raw: &str) -> String {
    let last = raw.trim().rsplit('/').next().unwrap_or_default();
    let last = last.split(['?', '#']).next().unwrap_or_default();
    let id: String = last.chars().filter(|c| *c != '-').collect();
    if let Some(tail) = id.len().checked_sub(32).and_then(|start| id.get(start..)) {
        if tail.len() < id.len() && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return tail.to_string();
        }
    }
    id
}

pub async fn info_handler(State(state): State<AppState>) -> Json<ApiResponse<InfoData>> {
    Json(ApiResponse::ok(InfoData {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        description: "Answers questions from a Notion workspace with Gemini",
        start_time: state.start_time.to_rfc3339(),
        endpoints: vec![
            ("chat", "POST /api/chat"),
            ("progress", "GET /api/chat/progress/:request_id"),
            ("search", "GET /api/notion/search"),
            ("page", "GET /api/notion/page/:page_id"),
            ("health", "GET /api/health"),
        ]
        .into_iter()
        .collect(),
        features: vec![
            "Workspace search",
            "Page content reading",
            "Cited answers",
            "Live progress",
        ],
    }))
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
