use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{TextCompletion, cancellable};
use crate::data_models::PageRef;
use crate::error::PipelineError;
use crate::structured::first_object;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SelectionReply {
    selected_indices: Vec<i64>,
}

pub struct PageSelector {
    llm: Arc<dyn TextCompletion>,
    max_selected: usize,
}

impl PageSelector {
    pub fn new(llm: Arc<dyn TextCompletion>, max_selected: usize) -> Self {
        Self { llm, max_selected }
    }

    /// Returns at most `max_selected` pages.
    ///
    /// Inputs that already fit are returned as-is without asking the model.
    /// When the model's reply is unusable the first `max_selected` pages are
    /// kept in their original order.
    pub async fn select(
        &self,
        pages: Vec<PageRef>,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageRef>, PipelineError> {
        if pages.len() <= self.max_selected {
            return Ok(pages);
        }

        let prompt = self.prompt(&pages, query);
        let picked = match cancellable(cancel, self.llm.invoke(&prompt)).await? {
            Ok(reply) => self.parse_reply(&reply, pages.len()),
            Err(e) => {
                tracing::warn!(error = %e, "page selection failed, keeping first pages");
                None
            }
        };

        match picked {
            Some(indices) => {
                tracing::info!(?indices, "pages selected");
                Ok(indices.into_iter().map(|i| pages[i].clone()).collect())
            }
            None => {
                let mut pages = pages;
                pages.truncate(self.max_selected);
                Ok(pages)
            }
        }
    }

    fn prompt(&self, pages: &[PageRef], query: &str) -> String {
        let candidates = pages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                format!(
                    "[{i}] Title: {}\n    ID: {}\n    Last edited: {}",
                    p.title, p.id, p.last_edited_time
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        format!(
            r#"You are a content curator. Pick the pages that best answer the user's question.

Question: "{query}"

Candidate pages:
{candidates}

Rules:
1. Select at most {max} pages.
2. Weigh both how relevant the title is and how recently the page was edited.
3. Prefer pages likely to contain concrete content.

Reply with JSON only, using the bracketed indices above:
{{
  "selectedIndices": [0, 1, 2],
  "reasoning": "why these pages"
}}"#,
            max = self.max_selected
        )
    }

    fn parse_reply(&self, reply: &str, count: usize) -> Option<Vec<usize>> {
        let parsed: SelectionReply = first_object(reply)?;
        let mut seen = HashSet::new();
        let indices: Vec<usize> = parsed
            .selected_indices
            .into_iter()
            .filter_map(|i| usize::try_from(i).ok())
            .filter(|&i| i < count)
            .filter(|&i| seen.insert(i))
            .take(self.max_selected)
            .collect();
        if indices.is_empty() {
            None
        } else {
            Some(indices)
        }
    }
}
