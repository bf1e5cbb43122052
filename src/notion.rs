use std::collections::HashMap;
use std::fmt::Write;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::collaborators::{PageMetadata, PageSearch, PageText};
use crate::data_models::PageRef;
use crate::error::CollaboratorError;

pub const NOTION_API_URL: &str = "https://api.notion.com/v1";
const UNTITLED: &str = "Untitled";

#[derive(Debug, Clone)]
pub struct NotionClient {
    http: Client,
    api_key: String,
    version: String,
    base_url: String,
}

impl NotionClient {
    pub fn new(api_key: &str, version: &str) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.to_string(),
            version: version.to_string(),
            base_url: NOTION_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("Notion-Version", &self.version)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, CollaboratorError> {
        let res = self.authorized(request).send().await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, CollaboratorError> {
    let status = res.status();
    if !status.is_success() {
        let message = res.text().await.unwrap_or_default();
        return Err(CollaboratorError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(res.json::<T>().await?)
}

#[derive(Debug, Deserialize)]
struct ResultList<T> {
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct NotionPage {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub last_edited_time: String,
    #[serde(default)]
    pub properties: HashMap<String, Property>,
}

#[derive(Debug, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Vec<RichText>,
}

#[derive(Debug, Deserialize)]
pub struct RichText {
    #[serde(default)]
    pub plain_text: String,
}

#[derive(Debug, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct BlockBody {
    #[serde(default)]
    rich_text: Vec<RichText>,
    #[serde(default)]
    checked: bool,
    #[serde(default)]
    language: Option<String>,
}

impl NotionPage {
    /// Text of the page's title property, or `"Untitled"`.
    pub fn title(&self) -> String {
        self.properties
            .values()
            .find(|p| p.kind == "title")
            .map(|p| plain_text(&p.title))
            .unwrap_or_else(|| UNTITLED.to_string())
    }

    pub fn into_page_ref(self) -> PageRef {
        PageRef {
            title: self.title(),
            id: self.id,
            url: self.url,
            created_time: self.created_time,
            last_edited_time: self.last_edited_time,
        }
    }
}

fn plain_text(rich: &[RichText]) -> String {
    rich.iter().map(|t| t.plain_text.as_str()).collect()
}

/// Renders page blocks as markdown-flavoured plain text. Unsupported block
/// types are skipped.
pub fn render_blocks(blocks: &[Block]) -> String {
    let mut text = String::new();
    for block in blocks {
        let body: BlockBody = block
            .data
            .get(&block.kind)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let line = plain_text(&body.rich_text);

        let _ = match block.kind.as_str() {
            "paragraph" => writeln!(text, "{line}\n"),
            "heading_1" => writeln!(text, "# {line}\n"),
            "heading_2" => writeln!(text, "## {line}\n"),
            "heading_3" => writeln!(text, "### {line}\n"),
            "bulleted_list_item" => writeln!(text, "• {line}"),
            "numbered_list_item" => writeln!(text, "1. {line}"),
            "to_do" => {
                let mark = if body.checked { "[✓]" } else { "[ ]" };
                writeln!(text, "{mark} {line}")
            }
            "quote" => writeln!(text, "> {line}\n"),
            "code" => {
                let language = body.language.unwrap_or_default();
                writeln!(text, "```{language}\n{line}\n```\n")
            }
            "divider" => writeln!(text, "---\n"),
            _ => Ok(()),
        };
    }
    text.trim().to_string()
}

#[async_trait]
impl PageSearch for NotionClient {
    async fn search(&self, query: &str) -> Result<Vec<PageRef>, CollaboratorError> {
        tracing::trace!(query, "notion search");
        let body = json!({
            "query": query,
            "filter": { "value": "page", "property": "object" },
        });
        let list: ResultList<NotionPage> = self
            .send(self.http.post(format!("{}/search", self.base_url)).json(&body))
            .await?;
        Ok(list
            .results
            .into_iter()
            .map(NotionPage::into_page_ref)
            .collect())
    }
}

#[async_trait]
impl PageMetadata for NotionClient {
    async fn page_info(&self, page_id: &str) -> Result<PageRef, CollaboratorError> {
        let page: NotionPage = self
            .send(self.http.get(format!("{}/pages/{page_id}", self.base_url)))
            .await?;
        Ok(page.into_page_ref())
    }
}

#[async_trait]
impl PageText for NotionClient {
    async fn page_content(&self, page_id: &str) -> Result<String, CollaboratorError> {
        let list: ResultList<Block> = self
            .send(
                self.http
                    .get(format!("{}/blocks/{page_id}/children", self.base_url))
                    .query(&[("page_size", "100")]),
            )
            .await?;
        Ok(render_blocks(&list.results))
    }
}
