use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::collaborators::{TextCompletion, cancellable};
use crate::error::PipelineError;
use crate::structured::first_object;

// English list from the stop-words crate plus common CJK particles.
static STOP_WORDS: Lazy<HashSet<String>> = Lazy::new(|| {
    stop_words::get(stop_words::LANGUAGE::English)
        .into_iter()
        .map(|x| x.to_string())
        .chain(
            ["的", "了", "是", "在", "和", "與", "或", "但", "然後", "因為", "所以"]
                .into_iter()
                .map(String::from),
        )
        .collect()
});

#[derive(Debug, Deserialize)]
struct KeywordReply {
    keywords: Vec<String>,
}

pub struct KeywordExtractor {
    llm: Arc<dyn TextCompletion>,
    max_keywords: usize,
}

impl KeywordExtractor {
    pub fn new(llm: Arc<dyn TextCompletion>, max_keywords: usize) -> Self {
        Self { llm, max_keywords }
    }

    /// Only cancellation is surfaced; anything else falls back to
    /// [`fallback_keywords`].
    pub async fn extract(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PipelineError> {
        let prompt = self.prompt(query);
        match cancellable(cancel, self.llm.invoke(&prompt)).await? {
            Ok(reply) => match self.parse_reply(&reply) {
                Some(keywords) => {
                    tracing::debug!(?keywords, "keywords extracted");
                    Ok(keywords)
                }
                None => {
                    tracing::warn!("keyword reply had no usable keyword list, using tokenizer");
                    Ok(fallback_keywords(query, self.max_keywords))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "keyword extraction failed, using tokenizer");
                Ok(fallback_keywords(query, self.max_keywords))
            }
        }
    }

    fn prompt(&self, query: &str) -> String {
        format!(
            r#"You are a search analyst. Extract the most useful search keywords from the user's question.

Question: "{query}"

Rules:
1. Return at most {max} keywords.
2. Keywords must be precise and worth searching for.
3. Prefer nouns and concrete concepts.
4. Avoid stopwords and vague, generic words.

Reply with JSON only:
{{
  "keywords": ["keyword1", "keyword2", "keyword3"],
  "reasoning": "why these keywords were chosen"
}}"#,
            max = self.max_keywords
        )
    }

    fn parse_reply(&self, reply: &str) -> Option<Vec<String>> {
        let parsed: KeywordReply = first_object(reply)?;
        let keywords: Vec<String> = parsed
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .take(self.max_keywords)
            .collect();
        if keywords.is_empty() {
            None
        } else {
            Some(keywords)
        }
    }
}

/// Deterministic tokenizer used when the completion is not usable.
///
/// Splits on whitespace, trims surrounding punctuation, drops tokens of two
/// characters or fewer and stopwords, then keeps the first `max_keywords`.
/// If nothing survives, the whole query is the single keyword.
pub fn fallback_keywords(query: &str, max_keywords: usize) -> Vec<String> {
    let words: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation() || is_cjk_punctuation(c)))
        .filter(|w| w.chars().count() > 2)
        .filter(|w| !STOP_WORDS.contains(&w.to_lowercase()))
        .take(max_keywords.max(1))
        .map(String::from)
        .collect();

    if words.is_empty() {
        vec![query.trim().to_string()]
    } else {
        words
    }
}

fn is_cjk_punctuation(c: char) -> bool {
    matches!(c, '，' | '。' | '？' | '！' | '：' | '；' | '、' | '「' | '」')
}
