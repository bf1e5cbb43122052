use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::data_models::{PageRef, ProgressEvent};
use crate::error::{CollaboratorError, PipelineError, SinkClosed};

#[async_trait]
pub trait PageSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<PageRef>, CollaboratorError>;
}

#[async_trait]
pub trait PageMetadata: Send + Sync {
    async fn page_info(&self, page_id: &str) -> Result<PageRef, CollaboratorError>;
}

#[async_trait]
pub trait PageText: Send + Sync {
    async fn page_content(&self, page_id: &str) -> Result<String, CollaboratorError>;
}

/// Free-text completion. The returned text may or may not contain the JSON
/// the prompt asked for; callers parse it defensively.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait ChildPageSource: Send + Sync {
    async fn child_pages(&self, parent: &PageRef) -> Result<Vec<PageRef>, CollaboratorError>;
}

/// Default child discovery: no page has children.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChildPages;

#[async_trait]
impl ChildPageSource for NoChildPages {
    async fn child_pages(&self, _parent: &PageRef) -> Result<Vec<PageRef>, CollaboratorError> {
        Ok(Vec::new())
    }
}

/// A closed sink never affects the run.
pub trait ProgressSink: Send + Sync {
    fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed>;
}

/// Awaits `fut` unless `cancel` fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Rate-limit wait between collaborator calls. Returns early with
/// `Cancelled` if the run is aborted mid-wait.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), PipelineError> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        };
    }
    cancellable(cancel, tokio::time::sleep(delay)).await
}
