use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data_models::{PageRef, SearchMetadata};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    /// Correlation id of a progress listener opened beforehand.
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub data: ChatData,
}

#[derive(Debug, Serialize)]
pub struct ChatData {
    pub response: String,
    pub timestamp: String,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: &str, details: Option<String>) -> Self {
        Self {
            success: false,
            error: error.to_string(),
            details,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct NotionSearchData {
    pub query: String,
    pub results: Vec<PageRef>,
    pub total: usize,
    pub returned: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionPageData {
    pub page: PageRef,
    pub content: String,
    pub content_length: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoData {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub start_time: String,
    pub endpoints: BTreeMap<&'static str, &'static str>,
    pub features: Vec<&'static str>,
}
