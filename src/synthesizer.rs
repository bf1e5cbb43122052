use std::fmt::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::collaborators::{TextCompletion, cancellable};
use crate::data_models::PageContent;
use crate::error::PipelineError;

pub struct ResponseSynthesizer {
    llm: Arc<dyn TextCompletion>,
}

impl ResponseSynthesizer {
    pub fn new(llm: Arc<dyn TextCompletion>) -> Self {
        Self { llm }
    }

    /// The sources block lists every top-level page, cited or not.
    pub async fn generate(
        &self,
        query: &str,
        tree: &[PageContent],
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        let prompt = build_prompt(query, tree);
        let answer = cancellable(cancel, self.llm.invoke(&prompt))
            .await?
            .map_err(|e| {
                tracing::error!(error = %e, "response synthesis failed");
                PipelineError::Synthesis(e)
            })?;

        Ok(format!("{}\n\n{}", answer.trim_end(), sources_block(tree)))
    }
}

/// Every node of the tree, parents before their children.
pub fn flatten(tree: &[PageContent]) -> Vec<&PageContent> {
    let mut out = Vec::new();
    let mut stack: Vec<&PageContent> = tree.iter().rev().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        stack.extend(node.children.iter().rev());
    }
    out
}

pub fn sources_block(tree: &[PageContent]) -> String {
    let mut block = String::from("---\n**Sources:**");
    for page in tree {
        let _ = write!(block, "\n- [{}]({})", page.title, page.url);
    }
    block
}

fn build_prompt(query: &str, tree: &[PageContent]) -> String {
    let mut content = String::new();
    for node in flatten(tree) {
        let _ = writeln!(content, "Title: {}", node.title);
        let _ = writeln!(content, "Level: {}", node.depth);
        let _ = writeln!(content, "Content: {}", node.content);
        if !node.children.is_empty() {
            let _ = writeln!(content, "Child pages: {}", node.children.len());
        }
        content.push_str("---\n");
    }

    format!(
        r#"You are an information analyst. Answer the user's question using the content below.

Question: "{query}"

Available content:
{content}
Rules:
1. Answer the question directly.
2. Organize and structure the relevant information.
3. Cite the specific source pages you used.
4. If the content does not answer the question, say so plainly.
5. Use clear formatting: headings, key points and a conclusion.

Formatting:
- Use headings and paragraphs where they help.
- Bold the most important facts.
- Use bullet points for lists.
- End with the sources you relied on."#
    )
}
