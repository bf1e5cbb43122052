use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{PageSearch, cancellable, pause};
use crate::config::SearchConfig;
use crate::data_models::PageRef;
use crate::error::PipelineError;

/// Insertion-ordered set of pages keyed by page id. The first hit for an id
/// wins; later duplicates are dropped.
#[derive(Debug, Default)]
pub struct PageSet {
    seen: HashSet<String>,
    pages: Vec<PageRef>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, page: PageRef) -> bool {
        if self.seen.contains(&page.id) {
            return false;
        }
        self.seen.insert(page.id.clone());
        self.pages.push(page);
        true
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn into_vec(self) -> Vec<PageRef> {
        self.pages
    }
}

pub struct FanOutSearcher {
    search: Arc<dyn PageSearch>,
    suffixes: Vec<String>,
    max_results: usize,
    delay: Duration,
}

impl FanOutSearcher {
    pub fn new(search: Arc<dyn PageSearch>, config: &SearchConfig) -> Self {
        Self {
            search,
            suffixes: config.query_suffixes.clone(),
            max_results: config.max_results,
            delay: config.search_delay,
        }
    }

    pub fn variants(&self, keyword: &str) -> Vec<String> {
        std::iter::once(keyword.to_string())
            .chain(self.suffixes.iter().map(|s| format!("{keyword} {s}")))
            .collect()
    }

    /// Returns unique pages (by id, first-seen order), at most `max_results`.
    ///
    /// The variants of one keyword run concurrently and are awaited together.
    /// Keywords run one after another with the configured delay in between.
    /// If any variant of a keyword fails, that keyword contributes nothing.
    pub async fn search(
        &self,
        keywords: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<PageRef>, PipelineError> {
        let mut found = PageSet::new();

        for (i, keyword) in keywords.iter().enumerate() {
            if i > 0 {
                pause(self.delay, cancel).await?;
            }
            tracing::info!(keyword = %keyword, "searching keyword ({}/{})", i + 1, keywords.len());

            let queries = self.variants(keyword);
            let searches = queries.iter().map(|q| self.search.search(q));
            match cancellable(cancel, try_join_all(searches)).await? {
                Ok(batches) => {
                    let before = found.len();
                    for page in batches.into_iter().flatten() {
                        found.insert(page);
                    }
                    tracing::debug!(keyword = %keyword, new = found.len() - before, "keyword merged");
                }
                Err(e) => {
                    tracing::warn!(keyword = %keyword, error = %e, "keyword search failed, skipping");
                }
            }
        }

        let mut pages = found.into_vec();
        pages.truncate(self.max_results);
        tracing::info!(count = pages.len(), "search finished with unique pages");
        Ok(pages)
    }
}
