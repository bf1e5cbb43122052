use std::time::Instant;

use serde::{Deserialize, Serialize};

pub const UNAVAILABLE_CONTENT: &str = "unavailable";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_time: String,
    pub last_edited_time: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub id: String,
    pub title: String,
    pub url: String,
    pub content: String,
    pub depth: u32,
    pub children: Vec<PageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageContent {
    pub fn fetched(info: PageRef, content: String, depth: u32) -> PageContent {
        PageContent {
            id: info.id,
            title: info.title,
            url: info.url,
            content,
            depth,
            children: Vec::new(),
            error: None,
        }
    }

    pub fn failed(page: &PageRef, depth: u32, error: String) -> PageContent {
        PageContent {
            id: page.id.clone(),
            title: page.title.clone(),
            url: page.url.clone(),
            content: UNAVAILABLE_CONTENT.to_string(),
            depth,
            children: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn max_depth(&self) -> u32 {
        self.children
            .iter()
            .map(PageContent::max_depth)
            .fold(self.depth, u32::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Analyze,
    Search,
    Select,
    Collect,
    Generate,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Analyze,
        Stage::Search,
        Stage::Select,
        Stage::Collect,
        Stage::Generate,
        Stage::Done,
    ];

    pub fn step(self) -> u32 {
        match self {
            Stage::Analyze => 1,
            Stage::Search => 2,
            Stage::Select => 3,
            Stage::Collect => 4,
            Stage::Generate => 5,
            Stage::Done => 6,
        }
    }

    pub fn percentage(self) -> u32 {
        match self {
            Stage::Analyze => 17,
            Stage::Search => 33,
            Stage::Select => 50,
            Stage::Collect => 67,
            Stage::Generate => 83,
            Stage::Done => 100,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Stage::Analyze => "Analyzing query...",
            Stage::Search => "Searching pages...",
            Stage::Select => "Selecting the best pages...",
            Stage::Collect => "Reading page content...",
            Stage::Generate => "Writing the answer...",
            Stage::Done => "Answer ready",
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Analyze => Some(Stage::Search),
            Stage::Search => Some(Stage::Select),
            Stage::Select => Some(Stage::Collect),
            Stage::Collect => Some(Stage::Generate),
            Stage::Generate => Some(Stage::Done),
            Stage::Done => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub message: String,
    pub step: u32,
    pub total_steps: u32,
    pub percentage: u32,
}

impl ProgressEvent {
    pub fn for_stage(stage: Stage, total_steps: u32) -> ProgressEvent {
        ProgressEvent {
            message: stage.message().to_string(),
            step: stage.step(),
            total_steps,
            percentage: stage.percentage(),
        }
    }
}

#[derive(Debug)]
pub struct SearchContext {
    pub query: String,
    pub started_at: Instant,
    pub total_steps: u32,
    pub current: Option<Stage>,
}

impl SearchContext {
    pub fn new(query: &str) -> SearchContext {
        SearchContext {
            query: query.to_string(),
            started_at: Instant::now(),
            total_steps: Stage::ALL.len() as u32,
            current: None,
        }
    }

    pub fn advance(&mut self, stage: Stage) -> ProgressEvent {
        let expected = match self.current {
            None => Stage::Analyze,
            Some(current) => current.next().unwrap_or(Stage::Done),
        };
        debug_assert_eq!(stage, expected, "pipeline stages must not be skipped");
        self.current = Some(stage);
        ProgressEvent::for_stage(stage, self.total_steps)
    }

    pub fn current_step(&self) -> u32 {
        self.current.map_or(0, Stage::step)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub id: String,
    pub url: String,
}

impl From<&PageRef> for Source {
    fn from(page: &PageRef) -> Source {
        Source {
            title: page.title.clone(),
            id: page.id.clone(),
            url: page.url.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub keywords: Vec<String>,
    pub total_pages_found: usize,
    pub selected_pages: usize,
    #[serde(rename = "processingTime")]
    pub processing_time_ms: u64,
    pub sources: Vec<Source>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub response: String,
    pub metadata: SearchMetadata,
}
