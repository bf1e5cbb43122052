use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join};
use tokio_util::sync::CancellationToken;

use crate::collaborators::{ChildPageSource, PageMetadata, PageText, cancellable, pause};
use crate::config::SearchConfig;
use crate::data_models::{PageContent, PageRef};
use crate::error::{CollaboratorError, PipelineError};

/// Reads the selected pages, and their children up to `max_depth`, into a
/// content tree.
pub struct ContentCollector {
    metadata: Arc<dyn PageMetadata>,
    text: Arc<dyn PageText>,
    children: Arc<dyn ChildPageSource>,
    max_depth: u32,
    delay: Duration,
}

impl ContentCollector {
    pub fn new(
        metadata: Arc<dyn PageMetadata>,
        text: Arc<dyn PageText>,
        children: Arc<dyn ChildPageSource>,
        config: &SearchConfig,
    ) -> Self {
        Self {
            metadata,
            text,
            children,
            max_depth: config.max_depth,
            delay: config.search_delay,
        }
    }

    /// Collects `pages` at `depth` (top level is 1), one page at a time.
    ///
    /// One node is returned per input page, in input order. A page whose
    /// metadata or body cannot be fetched becomes an `unavailable` node with
    /// its error recorded; its siblings are unaffected. Nothing is collected
    /// beyond `max_depth`.
    pub fn collect<'a>(
        &'a self,
        pages: &'a [PageRef],
        depth: u32,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<Vec<PageContent>, PipelineError>> {
        async move {
            if depth > self.max_depth {
                return Ok(Vec::new());
            }

            let mut nodes = Vec::with_capacity(pages.len());
            for (i, page) in pages.iter().enumerate() {
                if i > 0 {
                    pause(self.delay, cancel).await?;
                }
                tracing::info!(
                    title = %page.title,
                    depth,
                    "reading page ({}/{})",
                    i + 1,
                    pages.len()
                );

                let fetched = cancellable(
                    cancel,
                    try_join(
                        self.metadata.page_info(&page.id),
                        self.text.page_content(&page.id),
                    ),
                )
                .await?;

                let node = match fetched {
                    Ok((info, content)) => {
                        let mut node = PageContent::fetched(info, content, depth);
                        if depth < self.max_depth {
                            let children = self.discover_children(page, cancel).await?;
                            if !children.is_empty() {
                                tracing::debug!(title = %page.title, count = children.len(), "descending into child pages");
                                node.children = self.collect(&children, depth + 1, cancel).await?;
                            }
                        }
                        node
                    }
                    Err(e) => {
                        tracing::error!(title = %page.title, error = %e, "failed to read page");
                        PageContent::failed(page, depth, e.to_string())
                    }
                };
                nodes.push(node);
            }
            Ok(nodes)
        }
        .boxed()
    }

    async fn discover_children(
        &self,
        page: &PageRef,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageRef>, PipelineError> {
        let found: Result<Vec<PageRef>, CollaboratorError> =
            cancellable(cancel, self.children.child_pages(page)).await?;
        Ok(found.unwrap_or_else(|e| {
            tracing::warn!(page_id = %page.id, error = %e, "child page discovery failed");
            Vec::new()
        }))
    }
}
