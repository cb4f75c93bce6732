//! Summarizer seam for history compaction.
//!
//! The compactor hands batches of older items to a [`Summarizer`] and folds
//! the returned text into a single system notice. How the summary is produced
//! (which provider, which request shape) belongs to the implementor.

use crate::conversation::ConversationItem;
use async_trait::async_trait;
use thiserror::Error;

pub(crate) const COMPACTION_INSTRUCTIONS: &str = "\
Compact the provided conversation history.
- Focus on what is NOT completed yet and must be remembered to continue.
- Do NOT include file contents or patches; they are on the filesystem already.
- Be concise.";

/// Input for one summarization call.
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    /// Model that should produce the summary.
    pub model: &'a str,
    pub instructions: &'a str,
    pub items: &'a [ConversationItem],
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The tracing layer had no active trace or span to attach to.
    #[error("no existing trace found")]
    NoActiveTrace,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Cancelled")]
    Cancelled,
}

impl SummarizeError {
    /// Errors that are expected in normal operation and not worth a warning.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        match self {
            Self::NoActiveTrace => true,
            Self::Provider(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("no existing trace found") || lower.contains("setcurrentspan")
            }
            Self::Cancelled => false,
        }
    }
}

/// "Run a completion" collaborator used by the compactor.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String, SummarizeError>;
}

/// Render items as a plain transcript for summarization prompts.
///
/// Long tool arguments and outputs are truncated; the summary should not
/// carry large verbatim content anyway.
#[must_use]
pub fn format_items_for_summary(items: &[ConversationItem]) -> String {
    let mut parts = Vec::with_capacity(items.len());

    for item in items {
        match item {
            ConversationItem::Message { role, content } => {
                let label = match role {
                    crate::conversation::Role::System => "System",
                    crate::conversation::Role::User => "User",
                    crate::conversation::Role::Assistant => "Assistant",
                };
                parts.push(format!("[{label}]: {}", content.as_text()));
            }
            ConversationItem::ToolCall {
                name, arguments, ..
            } => {
                let args = truncate_chars(&arguments.to_string(), 200);
                parts.push(format!("[Tool call: {name}({args})]"));
            }
            ConversationItem::ToolResult { output, .. } => {
                let text = match output {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                parts.push(format!("[Tool result]: {}", truncate_chars(&text, 500)));
            }
        }
    }

    parts.join("\n\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{head}... [truncated]")
}
