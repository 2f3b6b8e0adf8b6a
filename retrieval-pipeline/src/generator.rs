use serde::Serialize;
use tracing::info;

use common::error::AppError;

use crate::{llm::LlmAdapter, RetrievedHit};

/// Fixed response when retrieval produced nothing; no model call is made.
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find relevant documents to answer your question.";

const ANSWER_SYSTEM_PROMPT: &str = "You are a legal assistant AI. Answer the user's question \
    based *only* on the provided context snippets. Do not use any prior knowledge. \
    If the context does not contain the answer, state that you cannot answer based on the \
    provided information. Be concise and directly answer the question.";

/// Characters of a hit quoted into its citation snippet.
const SNIPPET_CHARS: usize = 150;

/// A structured pointer from a generated answer back to the retrieved
/// chunk that supports it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Citation {
    pub source: String,
    pub text_snippet: String,
    pub score: f32,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Format retrieved hits as labeled source blocks for the prompt.
pub fn format_context(hits: &[RetrievedHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "Source ID: {}\nSource File: {}\nContent: {}",
                hit.id, hit.source_file, hit.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n")
}

/// One citation per retrieved hit, built independently of the model's own
/// text. Every citation is therefore traceable to an actual retrieval
/// result, whether or not the answer references it explicitly.
pub fn build_citations(hits: &[RetrievedHit]) -> Vec<Citation> {
    hits.iter()
        .map(|hit| {
            let mut snippet: String = hit.text.chars().take(SNIPPET_CHARS).collect();
            if hit.text.chars().count() > SNIPPET_CHARS {
                snippet.push_str("...");
            }
            Citation {
                source: hit.source_file.clone(),
                text_snippet: snippet,
                score: hit.score,
                file_url: Some(format!("/api/v1/documents/{}", hit.document_id)),
            }
        })
        .collect()
}

/// Produce a grounded answer for `question` from the retrieved hits.
pub async fn answer(
    adapter: &dyn LlmAdapter,
    question: &str,
    hits: &[RetrievedHit],
    model: &str,
) -> Result<GroundedAnswer, AppError> {
    if hits.is_empty() {
        info!("Generation called with no context; returning fixed fallback");
        return Ok(GroundedAnswer {
            answer: NO_CONTEXT_ANSWER.to_string(),
            citations: Vec::new(),
        });
    }

    let user_prompt = format!(
        "**Context Snippets:**\n{}\n\n**Question:**\n{}",
        format_context(hits),
        question
    );

    let text = adapter
        .generate_text(ANSWER_SYSTEM_PROMPT, &user_prompt, model)
        .await?;

    Ok(GroundedAnswer {
        answer: text,
        citations: build_citations(hits),
    })
}
