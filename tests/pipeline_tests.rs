use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scout::collector::ContentCollector;
use scout::config::SearchConfig;
use scout::data_models::{PageRef, Stage, UNAVAILABLE_CONTENT};
use scout::error::PipelineError;
use scout::fan_out::FanOutSearcher;
use scout::keywords::{KeywordExtractor, fallback_keywords};
use scout::orchestrator::{Collaborators, Orchestrator};
use scout::selector::PageSelector;

mod test_helpers {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tokio::time::Instant;

    use scout::collaborators::{
        ChildPageSource, PageMetadata, PageSearch, PageText, ProgressSink, TextCompletion,
    };
    use scout::data_models::ProgressEvent;
    use scout::error::{CollaboratorError, SinkClosed};

    pub fn page(id: &str) -> PageRef {
        PageRef {
            id: id.to_string(),
            title: format!("Title {id}"),
            url: format!("https://notion.so/{id}"),
            created_time: "2024-01-01T00:00:00.000Z".to_string(),
            last_edited_time: "2024-06-01T00:00:00.000Z".to_string(),
        }
    }

    pub fn ids(pages: &[PageRef]) -> Vec<String> {
        pages.iter().map(|p| p.id.clone()).collect()
    }

    /// In-memory workspace: canned search results per query, every known
    /// page readable unless listed as broken.
    #[derive(Default)]
    pub struct FakeWorkspace {
        results: HashMap<String, Vec<String>>,
        failing_queries: HashSet<String>,
        broken_pages: HashSet<String>,
        broken_metadata: HashSet<String>,
        pub searches: Mutex<Vec<(String, Instant)>>,
        pub reads: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeWorkspace {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on_search(mut self, query: &str, ids: &[&str]) -> Self {
            self.results
                .insert(query.to_string(), ids.iter().map(|s| s.to_string()).collect());
            self
        }

        pub fn failing_search(mut self, query: &str) -> Self {
            self.failing_queries.insert(query.to_string());
            self
        }

        pub fn broken_page(mut self, id: &str) -> Self {
            self.broken_pages.insert(id.to_string());
            self
        }

        pub fn broken_metadata(mut self, id: &str) -> Self {
            self.broken_metadata.insert(id.to_string());
            self
        }

        pub fn searched(&self) -> Vec<String> {
            self.searches
                .lock()
                .unwrap()
                .iter()
                .map(|(q, _)| q.clone())
                .collect()
        }
    }

    #[async_trait]
    impl PageSearch for FakeWorkspace {
        async fn search(&self, query: &str) -> Result<Vec<PageRef>, CollaboratorError> {
            self.searches
                .lock()
                .unwrap()
                .push((query.to_string(), Instant::now()));
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.failing_queries.contains(query) {
                return Err(CollaboratorError::Api {
                    status: 429,
                    message: "rate limited".into(),
                });
            }
            Ok(self
                .results
                .get(query)
                .map(|ids| ids.iter().map(|id| page(id)).collect())
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl PageMetadata for FakeWorkspace {
        async fn page_info(&self, page_id: &str) -> Result<PageRef, CollaboratorError> {
            self.reads
                .lock()
                .unwrap()
                .push((page_id.to_string(), Instant::now()));
            if self.broken_metadata.contains(page_id) {
                return Err(CollaboratorError::Api {
                    status: 404,
                    message: "object_not_found".into(),
                });
            }
            Ok(page(page_id))
        }
    }

    #[async_trait]
    impl PageText for FakeWorkspace {
        async fn page_content(&self, page_id: &str) -> Result<String, CollaboratorError> {
            if self.broken_pages.contains(page_id) {
                return Err(CollaboratorError::Http("connection reset".into()));
            }
            Ok(format!("body of {page_id}"))
        }
    }

    /// Completion fake that answers by prompt kind and records every prompt.
    pub struct ScriptedLlm {
        keywords: Result<String, String>,
        selection: Result<String, String>,
        answer: Result<String, String>,
        cancel_on_selection: Option<CancellationToken>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new() -> Self {
            Self {
                keywords: Err("no keyword reply scripted".into()),
                selection: Err("no selection reply scripted".into()),
                answer: Ok("Here is what I found.".into()),
                cancel_on_selection: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn keywords(mut self, reply: &str) -> Self {
            self.keywords = Ok(reply.to_string());
            self
        }

        pub fn selection(mut self, reply: &str) -> Self {
            self.selection = Ok(reply.to_string());
            self
        }

        pub fn failing_selection(mut self) -> Self {
            self.selection = Err("model overloaded".into());
            self
        }

        pub fn answer(mut self, reply: &str) -> Self {
            self.answer = Ok(reply.to_string());
            self
        }

        pub fn failing_answer(mut self) -> Self {
            self.answer = Err("model overloaded".into());
            self
        }

        pub fn cancel_on_selection(mut self, token: CancellationToken) -> Self {
            self.cancel_on_selection = Some(token);
            self
        }

        pub fn prompts_containing(&self, marker: &str) -> Vec<String> {
            self.prompts
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.contains(marker))
                .cloned()
                .collect()
        }
    }

    pub const KEYWORD_PROMPT: &str = "Extract the most useful search keywords";
    pub const SELECTION_PROMPT: &str = "Candidate pages:";
    pub const ANSWER_PROMPT: &str = "Available content:";

    #[async_trait]
    impl TextCompletion for ScriptedLlm {
        async fn invoke(&self, prompt: &str) -> Result<String, CollaboratorError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = if prompt.contains(KEYWORD_PROMPT) {
                &self.keywords
            } else if prompt.contains(SELECTION_PROMPT) {
                if let Some(token) = &self.cancel_on_selection {
                    token.cancel();
                    std::future::pending::<()>().await;
                }
                &self.selection
            } else {
                &self.answer
            };
            reply
                .clone()
                .map_err(CollaboratorError::Unavailable)
        }
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<ProgressEvent>>,
    }

    impl RecordingSink {
        pub fn percentages(&self) -> Vec<u32> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.percentage)
                .collect()
        }
    }

    impl ProgressSink for RecordingSink {
        fn deliver(&self, event: &ProgressEvent) -> Result<(), SinkClosed> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// A sink whose listener is already gone.
    pub struct ClosedSink;

    impl ProgressSink for ClosedSink {
        fn deliver(&self, _event: &ProgressEvent) -> Result<(), SinkClosed> {
            Err(SinkClosed)
        }
    }

    /// Every page has one fresh child, forever.
    pub struct EndlessChildren;

    #[async_trait]
    impl ChildPageSource for EndlessChildren {
        async fn child_pages(&self, parent: &PageRef) -> Result<Vec<PageRef>, CollaboratorError> {
            Ok(vec![page(&format!("{}-child", parent.id))])
        }
    }

    pub struct BrokenChildren;

    #[async_trait]
    impl ChildPageSource for BrokenChildren {
        async fn child_pages(&self, _parent: &PageRef) -> Result<Vec<PageRef>, CollaboratorError> {
            Err(CollaboratorError::Unavailable("no child index".into()))
        }
    }

    /// Three keywords, twelve unique pages: each keyword's variants overlap
    /// with each other and one hit repeats across keywords.
    pub fn q3_workspace() -> FakeWorkspace {
        FakeWorkspace::new()
            .on_search("Q3", &["q3-a", "q3-b"])
            .on_search("Q3 project", &["q3-c", "q3-a"])
            .on_search("Q3 plan", &["q3-d", "q3-b"])
            .on_search("status", &["st-a", "st-b", "q3-a"])
            .on_search("status project", &["st-c"])
            .on_search("status plan", &["st-d", "st-a"])
            .on_search("roadmap", &["rm-a", "rm-b"])
            .on_search("roadmap project", &["rm-c"])
            .on_search("roadmap plan", &["rm-d", "rm-c"])
    }

    pub const Q3_FOUND: [&str; 12] = [
        "q3-a", "q3-b", "q3-c", "q3-d", "st-a", "st-b", "st-c", "st-d", "rm-a", "rm-b", "rm-c",
        "rm-d",
    ];

    pub const Q3_KEYWORDS: &str =
        r#"{"keywords": ["Q3", "status", "roadmap"], "reasoning": "period, topic, artifact"}"#;

    pub fn orchestrator(
        workspace: Arc<FakeWorkspace>,
        llm: Arc<ScriptedLlm>,
        config: &SearchConfig,
    ) -> Orchestrator {
        Orchestrator::new(Collaborators::new(workspace, llm), config).unwrap()
    }
}

use test_helpers::*;

#[tokio::test(start_paused = true)]
async fn q3_status_query_end_to_end() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(
        ScriptedLlm::new()
            .keywords(Q3_KEYWORDS)
            .selection("Best matches:\n```json\n{\"selectedIndices\": [4, 0, 9], \"reasoning\": \"recent\"}\n```")
            .answer("**Q3 is on track.**"),
    );
    let sink = RecordingSink::default();
    let config = SearchConfig::default();

    let result = orchestrator(workspace.clone(), llm.clone(), &config)
        .run("What is the Q3 project status?", Some(&sink), &CancellationToken::new())
        .await?;

    assert_eq!(result.metadata.keywords, vec!["Q3", "status", "roadmap"]);
    assert_eq!(result.metadata.total_pages_found, 12);
    assert_eq!(result.metadata.selected_pages, 3);
    let source_ids: Vec<&str> = result.metadata.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(source_ids, vec!["st-a", "q3-a", "rm-b"]);

    assert!(result.response.starts_with("**Q3 is on track.**"));
    assert!(result.response.ends_with(
        "---\n**Sources:**\n\
         - [Title st-a](https://notion.so/st-a)\n\
         - [Title q3-a](https://notion.so/q3-a)\n\
         - [Title rm-b](https://notion.so/rm-b)"
    ));

    assert_eq!(sink.percentages(), vec![17, 33, 50, 67, 83, 100]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fan_out_dedups_in_first_seen_order() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let searcher = FanOutSearcher::new(workspace.clone(), &SearchConfig::default());
    let keywords = vec!["Q3".to_string(), "status".to_string(), "roadmap".to_string()];

    let pages = searcher.search(&keywords, &CancellationToken::new()).await?;

    assert_eq!(ids(&pages), Q3_FOUND.to_vec());
    assert_eq!(workspace.searched().len(), 9);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fan_out_truncates_to_max_results() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let config = SearchConfig {
        max_results: 5,
        ..Default::default()
    };
    let searcher = FanOutSearcher::new(workspace, &config);
    let keywords = vec!["Q3".to_string(), "status".to_string(), "roadmap".to_string()];

    let pages = searcher.search(&keywords, &CancellationToken::new()).await?;

    assert_eq!(ids(&pages), Q3_FOUND[..5].to_vec());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fan_out_waits_between_keywords_not_between_variants() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let searcher = FanOutSearcher::new(workspace.clone(), &SearchConfig::default());
    let keywords = vec!["Q3".to_string(), "status".to_string(), "roadmap".to_string()];

    searcher.search(&keywords, &CancellationToken::new()).await?;

    let searches = workspace.searches.lock().unwrap().clone();
    assert_eq!(searches.len(), 9);
    for batch in searches.chunks(3) {
        // Variants of one keyword start together.
        assert!(batch.iter().all(|(_, at)| *at == batch[0].1));
    }
    for pair in searches.chunks(3).collect::<Vec<_>>().windows(2) {
        let gap = pair[1][0].1 - pair[0][0].1;
        assert!(gap >= Duration::from_millis(350), "gap was {gap:?}");
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_keyword_is_skipped() -> Result<()> {
    let workspace = Arc::new(q3_workspace().failing_search("status plan"));
    let searcher = FanOutSearcher::new(workspace.clone(), &SearchConfig::default());
    let keywords = vec!["Q3".to_string(), "status".to_string(), "roadmap".to_string()];

    let pages = searcher.search(&keywords, &CancellationToken::new()).await?;

    assert_eq!(
        ids(&pages),
        vec!["q3-a", "q3-b", "q3-c", "q3-d", "rm-a", "rm-b", "rm-c", "rm-d"]
    );
    // The keyword after the failure was still searched.
    assert!(workspace.searched().contains(&"roadmap plan".to_string()));
    Ok(())
}

#[test]
fn fan_out_variants_use_configured_suffixes() {
    let searcher = FanOutSearcher::new(Arc::new(FakeWorkspace::new()), &SearchConfig::default());
    assert_eq!(
        searcher.variants("budget"),
        vec!["budget", "budget project", "budget plan"]
    );
}

#[tokio::test(start_paused = true)]
async fn failing_selection_keeps_first_pages() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS).failing_selection());

    let result = orchestrator(workspace, llm, &SearchConfig::default())
        .run("What is the Q3 project status?", None, &CancellationToken::new())
        .await?;

    let source_ids: Vec<&str> = result.metadata.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(source_ids, Q3_FOUND[..3].to_vec());
    Ok(())
}

#[tokio::test]
async fn small_candidate_list_skips_the_model() -> Result<()> {
    let llm = Arc::new(ScriptedLlm::new().selection(r#"{"selectedIndices": [1]}"#));
    let selector = PageSelector::new(llm.clone(), 3);
    let pages = vec![page("b"), page("a"), page("c")];

    let selected = selector
        .select(pages.clone(), "anything", &CancellationToken::new())
        .await?;

    assert_eq!(selected, pages);
    assert!(llm.prompts_containing(SELECTION_PROMPT).is_empty());
    Ok(())
}

#[tokio::test]
async fn selection_prompt_lists_candidates() -> Result<()> {
    let llm = Arc::new(ScriptedLlm::new().selection(r#"{"selectedIndices": [3, 1]}"#));
    let selector = PageSelector::new(llm.clone(), 3);
    let pages: Vec<PageRef> = ["a", "b", "c", "d"].iter().map(|id| page(id)).collect();

    let selected = selector
        .select(pages, "which plan?", &CancellationToken::new())
        .await?;

    assert_eq!(ids(&selected), vec!["d", "b"]);
    let prompt = &llm.prompts_containing(SELECTION_PROMPT)[0];
    assert!(prompt.contains("[0] Title: Title a"));
    assert!(prompt.contains("ID: d"));
    assert!(prompt.contains("Last edited: 2024-06-01T00:00:00.000Z"));
    Ok(())
}

#[tokio::test]
async fn unusable_selection_falls_back() -> Result<()> {
    let llm = Arc::new(ScriptedLlm::new().selection(r#"{"selectedIndices": [99, -3]}"#));
    let selector = PageSelector::new(llm, 2);
    let pages: Vec<PageRef> = ["a", "b", "c", "d"].iter().map(|id| page(id)).collect();

    let selected = selector
        .select(pages, "q", &CancellationToken::new())
        .await?;

    assert_eq!(ids(&selected), vec!["a", "b"]);
    Ok(())
}

#[tokio::test]
async fn keyword_reply_is_capped_and_cleaned() -> Result<()> {
    let llm = Arc::new(
        ScriptedLlm::new().keywords(r#"{"keywords": [" alpha ", "", "beta", "gamma", "delta"]}"#),
    );
    let extractor = KeywordExtractor::new(llm, 3);

    let keywords = extractor
        .extract("irrelevant", &CancellationToken::new())
        .await?;

    assert_eq!(keywords, vec!["alpha", "beta", "gamma"]);
    Ok(())
}

#[tokio::test]
async fn keyword_failures_fall_back_to_tokenizer() -> Result<()> {
    let query = "quarterly kubernetes migration budget";
    let expected = fallback_keywords(query, 3);
    assert!(!expected.is_empty() && expected.len() <= 3);

    for reply in [
        None,
        Some("I think the keywords are budget and kubernetes."),
        Some(r#"{"keywords": []}"#),
        Some(r#"{"keywords": "budget"}"#),
    ] {
        let llm = match reply {
            Some(r) => ScriptedLlm::new().keywords(r),
            None => ScriptedLlm::new(),
        };
        let extractor = KeywordExtractor::new(Arc::new(llm), 3);
        let keywords = extractor.extract(query, &CancellationToken::new()).await?;
        assert_eq!(keywords, expected, "reply {reply:?}");
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broken_page_is_isolated() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new().broken_page("b"));
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(scout::collaborators::NoChildPages),
        &SearchConfig::default(),
    );
    let pages = vec![page("a"), page("b"), page("c")];

    let tree = collector.collect(&pages, 1, &CancellationToken::new()).await?;

    assert_eq!(tree.len(), 3);
    assert_eq!(
        tree.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    let failed: Vec<_> = tree.iter().filter(|n| n.is_failed()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, "b");
    assert_eq!(failed[0].content, UNAVAILABLE_CONTENT);
    assert_eq!(failed[0].url, "https://notion.so/b");
    assert!(failed[0].children.is_empty());
    assert_eq!(tree[0].content, "body of a");
    assert_eq!(tree[2].content, "body of c");
    assert!(tree.iter().all(|n| n.depth == 1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_metadata_fetch_marks_the_node_failed() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new().broken_metadata("b"));
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(scout::collaborators::NoChildPages),
        &SearchConfig::default(),
    );
    let pages = vec![page("a"), page("b"), page("c")];

    let tree = collector.collect(&pages, 1, &CancellationToken::new()).await?;

    assert_eq!(
        tree.iter().map(|n| n.id.as_str()).collect::<Vec<_>>(),
        vec!["a", "b", "c"]
    );
    let broken = &tree[1];
    assert!(broken.is_failed());
    assert_eq!(broken.content, UNAVAILABLE_CONTENT);
    assert!(broken.error.as_deref().unwrap_or_default().contains("404"));
    assert_eq!(broken.title, "Title b");
    assert_eq!(broken.url, "https://notion.so/b");
    assert!(!tree[0].is_failed());
    assert!(!tree[2].is_failed());
    assert_eq!(tree[0].content, "body of a");
    assert_eq!(tree[2].content, "body of c");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn broken_page_still_reaches_done() -> Result<()> {
    let workspace = Arc::new(q3_workspace().broken_page("q3-b"));
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS).failing_selection());
    let sink = RecordingSink::default();

    let result = orchestrator(workspace, llm.clone(), &SearchConfig::default())
        .run("What is the Q3 project status?", Some(&sink), &CancellationToken::new())
        .await?;

    assert_eq!(sink.percentages().last(), Some(&100));
    assert_eq!(result.metadata.sources.len(), 3);
    assert!(result.response.contains("- [Title q3-b](https://notion.so/q3-b)"));
    let prompt = &llm.prompts_containing(ANSWER_PROMPT)[0];
    assert!(prompt.contains(&format!("Content: {UNAVAILABLE_CONTENT}")));
    assert!(prompt.contains("Content: body of q3-a"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn collector_waits_between_pages() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new());
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(scout::collaborators::NoChildPages),
        &SearchConfig::default(),
    );
    let pages = vec![page("a"), page("b"), page("c")];

    collector.collect(&pages, 1, &CancellationToken::new()).await?;

    let reads = workspace.reads.lock().unwrap().clone();
    assert_eq!(reads.len(), 3);
    for pair in reads.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(350));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn recursion_stops_at_max_depth() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new());
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(EndlessChildren),
        &SearchConfig::default(),
    );

    let tree = collector
        .collect(&[page("root")], 1, &CancellationToken::new())
        .await?;

    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].max_depth(), 3);
    let level2 = &tree[0].children[0];
    let level3 = &level2.children[0];
    assert_eq!(level2.id, "root-child");
    assert_eq!(level3.depth, 3);
    assert!(level3.children.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shallower_depth_limit_is_respected() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new());
    let config = SearchConfig {
        max_depth: 1,
        ..Default::default()
    };
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(EndlessChildren),
        &config,
    );

    let tree = collector
        .collect(&[page("a"), page("b")], 1, &CancellationToken::new())
        .await?;

    assert!(tree.iter().all(|n| n.max_depth() == 1 && n.children.is_empty()));
    Ok(())
}

#[tokio::test]
async fn child_discovery_error_keeps_the_page() -> Result<()> {
    let workspace = Arc::new(FakeWorkspace::new());
    let config = SearchConfig {
        search_delay: Duration::ZERO,
        ..Default::default()
    };
    let collector = ContentCollector::new(
        workspace.clone(),
        workspace.clone(),
        Arc::new(BrokenChildren),
        &config,
    );

    let tree = collector
        .collect(&[page("a")], 1, &CancellationToken::new())
        .await?;

    assert_eq!(tree.len(), 1);
    assert!(!tree[0].is_failed());
    assert!(tree[0].children.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_is_fatal() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS).failing_answer());
    let sink = RecordingSink::default();

    let err = orchestrator(workspace, llm, &SearchConfig::default())
        .run("What is the Q3 project status?", Some(&sink), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Synthesis(_)));
    assert_eq!(sink.percentages(), vec![17, 33, 50, 67, 83]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn closed_sink_does_not_affect_the_run() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS));

    let result = orchestrator(workspace, llm, &SearchConfig::default())
        .run("What is the Q3 project status?", Some(&ClosedSink), &CancellationToken::new())
        .await?;

    assert_eq!(result.metadata.selected_pages, 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_the_run() -> Result<()> {
    let cancel = CancellationToken::new();
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(
        ScriptedLlm::new()
            .keywords(Q3_KEYWORDS)
            .cancel_on_selection(cancel.clone()),
    );
    let sink = RecordingSink::default();

    let err = orchestrator(workspace, llm.clone(), &SearchConfig::default())
        .run("What is the Q3 project status?", Some(&sink), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(sink.percentages(), vec![17, 33, 50]);
    assert!(llm.prompts_containing(ANSWER_PROMPT).is_empty());
    Ok(())
}

#[tokio::test]
async fn cancelled_before_start_never_searches() -> Result<()> {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS));

    let err = orchestrator(workspace.clone(), llm, &SearchConfig::default())
        .run("What is the Q3 project status?", None, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert!(workspace.searched().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn identical_runs_report_identical_sources() -> Result<()> {
    let mut runs = Vec::new();
    for _ in 0..2 {
        let workspace = Arc::new(q3_workspace());
        let llm = Arc::new(
            ScriptedLlm::new()
                .keywords(Q3_KEYWORDS)
                .selection(r#"{"selectedIndices": [11, 2, 5]}"#),
        );
        let result = orchestrator(workspace, llm, &SearchConfig::default())
            .run("What is the Q3 project status?", None, &CancellationToken::new())
            .await?;
        runs.push(result.metadata.sources);
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].len(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn progress_steps_are_in_order() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS));
    let sink = RecordingSink::default();

    orchestrator(workspace, llm, &SearchConfig::default())
        .run("What is the Q3 project status?", Some(&sink), &CancellationToken::new())
        .await?;

    let events = sink.events.lock().unwrap().clone();
    let expected: Vec<u32> = Stage::ALL.iter().map(|s| s.step()).collect();
    assert_eq!(events.iter().map(|e| e.step).collect::<Vec<_>>(), expected);
    assert!(events.iter().all(|e| e.total_steps == 6));
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let config = SearchConfig {
        max_selected_pages: 0,
        ..Default::default()
    };
    let built = Orchestrator::new(
        Collaborators::new(Arc::new(FakeWorkspace::new()), Arc::new(ScriptedLlm::new())),
        &config,
    );
    assert!(matches!(built, Err(PipelineError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn child_pages_reach_the_answer_prompt() -> Result<()> {
    let workspace = Arc::new(q3_workspace());
    let llm = Arc::new(ScriptedLlm::new().keywords(Q3_KEYWORDS));
    let collaborators =
        Collaborators::new(workspace, llm.clone()).with_children(Arc::new(EndlessChildren));

    let result = Orchestrator::new(collaborators, &SearchConfig::default())?
        .run("What is the Q3 project status?", None, &CancellationToken::new())
        .await?;

    let prompt = &llm.prompts_containing(ANSWER_PROMPT)[0];
    assert!(prompt.contains("Child pages: 1"));
    assert!(prompt.contains("Title: Title q3-a-child-child"));
    assert!(prompt.contains("Level: 3"));
    assert!(!prompt.contains("q3-a-child-child-child"));
    // Children are read but only top-level pages are cited.
    assert!(!result.response.contains("q3-a-child]("));
    Ok(())
}
