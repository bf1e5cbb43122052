use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::collaborators::{
    ChildPageSource, NoChildPages, PageMetadata, PageSearch, PageText, ProgressSink,
    TextCompletion,
};
use crate::collector::ContentCollector;
use crate::config::SearchConfig;
use crate::data_models::{SearchContext, SearchMetadata, SearchResult, Source, Stage};
use crate::error::PipelineError;
use crate::fan_out::FanOutSearcher;
use crate::keywords::KeywordExtractor;
use crate::selector::PageSelector;
use crate::synthesizer::ResponseSynthesizer;

#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn PageSearch>,
    pub metadata: Arc<dyn PageMetadata>,
    pub text: Arc<dyn PageText>,
    pub llm: Arc<dyn TextCompletion>,
    pub children: Arc<dyn ChildPageSource>,
}

impl Collaborators {
    pub fn new<W>(workspace: Arc<W>, llm: Arc<dyn TextCompletion>) -> Self
    where
        W: PageSearch + PageMetadata + PageText + 'static,
    {
        Self {
            search: workspace.clone(),
            metadata: workspace.clone(),
            text: workspace,
            llm,
            children: Arc::new(NoChildPages),
        }
    }

    pub fn with_children(mut self, children: Arc<dyn ChildPageSource>) -> Self {
        self.children = children;
        self
    }
}

pub struct Orchestrator {
    extractor: KeywordExtractor,
    searcher: FanOutSearcher,
    selector: PageSelector,
    collector: ContentCollector,
    synthesizer: ResponseSynthesizer,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: &SearchConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let Collaborators {
            search,
            metadata,
            text,
            llm,
            children,
        } = collaborators;

        Ok(Self {
            extractor: KeywordExtractor::new(llm.clone(), config.max_keywords),
            searcher: FanOutSearcher::new(search, config),
            selector: PageSelector::new(llm.clone(), config.max_selected_pages),
            collector: ContentCollector::new(metadata, text, children, config),
            synthesizer: ResponseSynthesizer::new(llm),
        })
    }

    /// Runs the whole pipeline for `query`.
    ///
    /// Progress goes to `progress` if given; a sink that fails to accept an
    /// event is ignored. Cancelling `cancel` aborts at the next collaborator
    /// call or rate-limit wait.
    pub async fn run(
        &self,
        query: &str,
        progress: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, PipelineError> {
        let run_id = nanoid::nanoid!(10);
        self.run_stages(query, progress, cancel)
            .instrument(tracing::info_span!("search", %run_id))
            .await
    }

    async fn run_stages(
        &self,
        query: &str,
        progress: Option<&dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<SearchResult, PipelineError> {
        let mut ctx = SearchContext::new(query);

        enter(&mut ctx, Stage::Analyze, progress);
        let keywords = self.extractor.extract(&ctx.query, cancel).await?;

        enter(&mut ctx, Stage::Search, progress);
        let found = self.searcher.search(&keywords, cancel).await?;
        let total_pages_found = found.len();

        enter(&mut ctx, Stage::Select, progress);
        let selected = self.selector.select(found, &ctx.query, cancel).await?;

        enter(&mut ctx, Stage::Collect, progress);
        let tree = self.collector.collect(&selected, 1, cancel).await?;

        enter(&mut ctx, Stage::Generate, progress);
        let response = self.synthesizer.generate(&ctx.query, &tree, cancel).await?;

        enter(&mut ctx, Stage::Done, progress);
        let processing_time_ms = ctx.started_at.elapsed().as_millis() as u64;

        Ok(SearchResult {
            response,
            metadata: SearchMetadata {
                keywords,
                total_pages_found,
                selected_pages: selected.len(),
                processing_time_ms,
                sources: selected.iter().map(Source::from).collect(),
            },
        })
    }
}

fn enter(ctx: &mut SearchContext, stage: Stage, progress: Option<&dyn ProgressSink>) {
    let event = ctx.advance(stage);
    tracing::info!(
        "[progress {}/{}] {} ({}%)",
        event.step,
        event.total_steps,
        event.message,
        event.percentage
    );
    if let Some(sink) = progress {
        if let Err(e) = sink.deliver(&event) {
            tracing::debug!(error = %e, step = event.step, "progress event dropped");
        }
    }
}
