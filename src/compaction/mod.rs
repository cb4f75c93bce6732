//! Context compaction for managing conversation length.
//!
//! Older items are summarized into a single system notice while the most
//! recent items are kept verbatim. When the older portion is itself too large
//! for one summarization request it is consumed in batches sized against the
//! compaction model's window.

mod counter;
mod profile;
mod split;
mod summarization;

pub use counter::{KindTokens, TokenCount, TokenCounter};
pub use profile::{
    ContextProfiles, DEFAULT_CONTEXT_LIMIT, DEFAULT_TRIGGER_FRACTION, ModelContextProfile,
    limit_for, trigger_tokens,
};
pub use split::{DEFAULT_RECENT_ITEMS, SplitItems, split_items};
pub use summarization::{
    SummarizeError, Summarizer, SummaryRequest, format_items_for_summary,
};

use crate::agent::{AgentEvent, EventSink};
use crate::config::CompactionSettings;
use crate::conversation::ConversationItem;
use std::sync::Arc;
use summarization::COMPACTION_INSTRUCTIONS;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Notice used when nothing was summarized.
pub const DEFAULT_NOTICE: &str = "... conversation history compacted ...";

const NOTICE_HEADER: &str = "Key observations from earlier:\n";

/// Configuration for history compaction.
#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Trailing items always kept verbatim (default: 3)
    pub recent_items: usize,
    /// Fraction of the compaction model's window one batch may fill (default: 0.9)
    pub batch_fraction: f64,
    /// Fraction of the chat model's window that triggers compaction (default: 0.5)
    pub trigger_fraction: f64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            recent_items: DEFAULT_RECENT_ITEMS,
            batch_fraction: 0.9,
            trigger_fraction: DEFAULT_TRIGGER_FRACTION,
        }
    }
}

impl From<&CompactionSettings> for CompactionConfig {
    fn from(settings: &CompactionSettings) -> Self {
        Self {
            recent_items: settings.recent_items,
            batch_fraction: settings.batch_fraction,
            trigger_fraction: settings.trigger_fraction,
        }
    }
}

/// Result of checking whether compaction is needed.
#[derive(Debug, Clone)]
pub struct CompactionStatus {
    pub total_tokens: usize,
    pub trigger_tokens: usize,
    pub needs_compaction: bool,
    pub item_count: usize,
}

/// What happened to one summarization batch.
#[derive(Debug)]
pub enum BatchOutcome {
    Summarized(String),
    /// The summarizer returned only whitespace.
    Empty,
    Failed(SummarizeError),
}

#[derive(Debug)]
pub struct BatchReport {
    pub items: usize,
    pub estimated_tokens: usize,
    pub outcome: BatchOutcome,
}

/// Where the notice text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    /// Nothing to summarize, or no compaction model configured.
    Default,
    Summarized,
    /// Every batch failed; the notice only counts what was dropped.
    Fallback,
}

/// Output of one compaction pass.
#[derive(Debug)]
pub struct CompactionArtifact {
    pub notice_content: String,
    /// `[system(notice), ...recent]`
    pub items_to_add: Vec<ConversationItem>,
    /// Number of older items replaced by the notice.
    pub compacted_items: usize,
    pub source: NoticeSource,
    pub batches: Vec<BatchReport>,
}

#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("Compaction cancelled")]
    Cancelled,
}

/// Summarizes older conversation items into a single notice.
pub struct HistoryCompactor {
    summarizer: Arc<dyn Summarizer>,
    config: CompactionConfig,
    profiles: ContextProfiles,
    counter: TokenCounter,
    events: EventSink,
}

impl HistoryCompactor {
    pub fn new(summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            summarizer,
            config: CompactionConfig::default(),
            profiles: ContextProfiles::new(),
            counter: TokenCounter::new(),
            events: EventSink::disconnected(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CompactionConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_profiles(mut self, profiles: ContextProfiles) -> Self {
        self.profiles = profiles;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    #[must_use]
    pub fn profiles(&self) -> &ContextProfiles {
        &self.profiles
    }

    /// Check whether `items` exceed the trigger budget of `model`.
    #[must_use]
    pub fn check(&self, items: &[ConversationItem], model: Option<&str>) -> CompactionStatus {
        let total = self.counter.estimate(items);
        let trigger = self
            .profiles
            .trigger_tokens(model, self.config.trigger_fraction);

        CompactionStatus {
            total_tokens: total,
            trigger_tokens: trigger,
            needs_compaction: total >= trigger,
            item_count: items.len(),
        }
    }

    /// Compact `items`, summarizing with `model`.
    ///
    /// Summarizer failures never fail compaction; only cancellation does.
    /// Batches run strictly in order so summaries keep conversation order.
    pub async fn compact(
        &self,
        items: &[ConversationItem],
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CompactionArtifact, CompactionError> {
        let split = split_items(items, self.config.recent_items);
        let older = split.older;

        let model = match model.filter(|m| !m.trim().is_empty()) {
            Some(model) if !older.is_empty() => model,
            _ => {
                return Ok(build_artifact(
                    DEFAULT_NOTICE.to_string(),
                    split,
                    NoticeSource::Default,
                    Vec::new(),
                ));
            }
        };

        let budget = self
            .profiles
            .trigger_tokens(Some(model), self.config.batch_fraction);

        tracing::info!(
            older = older.len(),
            recent = split.recent.len(),
            budget,
            model,
            "Compacting conversation history"
        );

        let _indicator = CompactingIndicator::start(&self.events);
        let mut batches = Vec::new();
        let mut remaining = older;

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                return Err(CompactionError::Cancelled);
            }

            let len = self.next_batch_len(remaining, budget);
            let (batch, rest) = remaining.split_at(len);
            let estimated_tokens = self.counter.estimate(batch);

            let request = SummaryRequest {
                model,
                instructions: COMPACTION_INSTRUCTIONS,
                items: batch,
            };

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(CompactionError::Cancelled),
                result = self.summarizer.summarize(request) => result,
            };

            let outcome = match result {
                Ok(text) if text.trim().is_empty() => BatchOutcome::Empty,
                Ok(text) => BatchOutcome::Summarized(text.trim().to_string()),
                Err(e) => {
                    if e.is_benign() {
                        tracing::debug!("Compaction summarization skipped: {e}");
                    } else {
                        tracing::warn!(items = batch.len(), "Compaction summarization failed: {e}");
                    }
                    BatchOutcome::Failed(e)
                }
            };

            batches.push(BatchReport {
                items: batch.len(),
                estimated_tokens,
                outcome,
            });
            remaining = rest;
        }

        let summaries: Vec<&str> = batches
            .iter()
            .filter_map(|b| match &b.outcome {
                BatchOutcome::Summarized(text) => Some(text.as_str()),
                _ => None,
            })
            .collect();

        let (notice, source) = if !summaries.is_empty() {
            (
                format!("{NOTICE_HEADER}{}", summaries.join("\n\n")),
                NoticeSource::Summarized,
            )
        } else if batches
            .iter()
            .any(|b| matches!(b.outcome, BatchOutcome::Failed(_)))
        {
            (fallback_notice(older), NoticeSource::Fallback)
        } else {
            (DEFAULT_NOTICE.to_string(), NoticeSource::Default)
        };

        tracing::info!(
            batches = batches.len(),
            summarized = summaries.len(),
            "Compaction complete"
        );

        Ok(build_artifact(notice, split, source, batches))
    }

    /// Length of the next batch taken from the front of `remaining`.
    ///
    /// Shrinks by a factor of 0.8 until the estimate fits `budget`. A single
    /// oversized item is still returned so the loop always advances.
    fn next_batch_len(&self, remaining: &[ConversationItem], budget: usize) -> usize {
        let mut len = remaining.len();
        while len > 0 {
            if self.counter.estimate(&remaining[..len]) <= budget {
                return len;
            }
            len = len * 4 / 5;
        }
        remaining.len().min(1)
    }
}

/// Notice used when every summarization batch failed.
#[must_use]
pub fn fallback_notice(older: &[ConversationItem]) -> String {
    let tool_calls = older.iter().filter(|item| item.is_tool_call()).count();
    format!(
        "... conversation history compacted ({} items, {tool_calls} tool calls) ...",
        older.len()
    )
}

fn build_artifact(
    notice: String,
    split: SplitItems<'_>,
    source: NoticeSource,
    batches: Vec<BatchReport>,
) -> CompactionArtifact {
    let mut items_to_add = Vec::with_capacity(1 + split.recent.len());
    items_to_add.push(ConversationItem::system(notice.clone()));
    items_to_add.extend_from_slice(split.recent);

    CompactionArtifact {
        notice_content: notice,
        items_to_add,
        compacted_items: split.older.len(),
        source,
        batches,
    }
}

/// Emits `Compacting(true)` on start and `Compacting(false)` when dropped,
/// including on cancellation.
struct CompactingIndicator<'a> {
    events: &'a EventSink,
}

impl<'a> CompactingIndicator<'a> {
    fn start(events: &'a EventSink) -> Self {
        events.emit(AgentEvent::Compacting(true));
        Self { events }
    }
}

impl Drop for CompactingIndicator<'_> {
    fn drop(&mut self) {
        self.events.emit(AgentEvent::Compacting(false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replays scripted results and records batch sizes.
    #[derive(Default)]
    struct ScriptedSummarizer {
        script: Mutex<VecDeque<Result<String, SummarizeError>>>,
        fallback: Option<String>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedSummarizer {
        fn always(text: &str) -> Self {
            Self {
                fallback: Some(text.to_string()),
                ..Self::default()
            }
        }

        fn scripted(results: Vec<Result<String, SummarizeError>>) -> Self {
            Self {
                script: Mutex::new(results.into()),
                ..Self::default()
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(&self, request: SummaryRequest<'_>) -> Result<String, SummarizeError> {
            assert!(!request.instructions.is_empty());
            self.calls.lock().unwrap().push(request.items.len());
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                return next;
            }
            match &self.fallback {
                Some(text) => Ok(text.clone()),
                None => Err(SummarizeError::Provider("bang".into())),
            }
        }
    }

    struct PendingSummarizer;

    #[async_trait]
    impl Summarizer for PendingSummarizer {
        async fn summarize(&self, _: SummaryRequest<'_>) -> Result<String, SummarizeError> {
            std::future::pending().await
        }
    }

    fn seven_items() -> Vec<ConversationItem> {
        vec![
            ConversationItem::system("instructions"),
            ConversationItem::user("u1"),
            ConversationItem::user("u2"),
            ConversationItem::user("u3"),
            ConversationItem::user("u4"),
            ConversationItem::user("u5"),
            ConversationItem::user("u6"),
        ]
    }

    fn compactor(summarizer: &Arc<ScriptedSummarizer>) -> HistoryCompactor {
        HistoryCompactor::new(summarizer.clone())
    }

    #[tokio::test]
    async fn test_summary_notice_and_recent_items() {
        let summarizer = Arc::new(ScriptedSummarizer::always("Key facts decided."));
        let items = seven_items();

        let artifact = compactor(&summarizer)
            .compact(&items, Some("gpt-5-nano"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.compacted_items, 4);
        assert_eq!(artifact.source, NoticeSource::Summarized);
        assert!(artifact.notice_content.starts_with("Key observations from earlier:\n"));
        assert!(artifact.notice_content.contains("Key facts decided."));
        assert_eq!(artifact.items_to_add.len(), 4);
        assert_eq!(
            artifact.items_to_add[0],
            ConversationItem::system(artifact.notice_content.clone())
        );
        assert_eq!(&artifact.items_to_add[1..], &items[4..]);
        assert_eq!(summarizer.batch_sizes(), vec![4]);
    }

    #[tokio::test]
    async fn test_fallback_when_every_batch_fails() {
        let summarizer = Arc::new(ScriptedSummarizer::default());
        let artifact = compactor(&summarizer)
            .compact(&seven_items(), Some("gpt-5-nano"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            artifact.notice_content,
            "... conversation history compacted (4 items, 0 tool calls) ..."
        );
        assert_eq!(artifact.source, NoticeSource::Fallback);
        assert!(matches!(
            artifact.batches[0].outcome,
            BatchOutcome::Failed(SummarizeError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_fallback_counts_tool_calls() {
        let summarizer = Arc::new(ScriptedSummarizer::scripted(vec![Err(
            SummarizeError::NoActiveTrace,
        )]));
        let items = vec![
            ConversationItem::user("run it"),
            ConversationItem::tool_call("a", "shell", json!({"commands": ["ls"]})),
            ConversationItem::tool_result("a", json!("src")),
            ConversationItem::tool_call("b", "shell", json!({"commands": ["pwd"]})),
            ConversationItem::tool_result("b", json!("/work")),
            ConversationItem::assistant("done"),
            ConversationItem::user("next"),
            ConversationItem::assistant("ok"),
        ];

        let artifact = compactor(&summarizer)
            .compact(&items, Some("gpt-5-nano"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            artifact.notice_content,
            "... conversation history compacted (5 items, 2 tool calls) ..."
        );
    }

    #[tokio::test]
    async fn test_nothing_older_uses_default_notice() {
        let summarizer = Arc::new(ScriptedSummarizer::always("unused"));
        let compactor = compactor(&summarizer);
        let cancel = CancellationToken::new();

        let empty = compactor.compact(&[], Some("gpt-5"), &cancel).await.unwrap();
        assert_eq!(empty.notice_content, DEFAULT_NOTICE);
        assert_eq!(empty.items_to_add, vec![ConversationItem::system(DEFAULT_NOTICE)]);

        let few = vec![ConversationItem::user("a"), ConversationItem::assistant("b")];
        let artifact = compactor.compact(&few, Some("gpt-5"), &cancel).await.unwrap();
        assert_eq!(artifact.notice_content, DEFAULT_NOTICE);
        assert_eq!(artifact.source, NoticeSource::Default);
        assert_eq!(artifact.items_to_add.len(), 3);
        assert_eq!(&artifact.items_to_add[1..], &few[..]);

        assert!(summarizer.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_no_model_skips_summarizer() {
        let summarizer = Arc::new(ScriptedSummarizer::always("unused"));
        let artifact = compactor(&summarizer)
            .compact(&seven_items(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.notice_content, DEFAULT_NOTICE);
        assert_eq!(artifact.compacted_items, 4);
        assert!(summarizer.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_batches_when_older_exceeds_window() {
        let summarizer = Arc::new(ScriptedSummarizer::scripted(vec![
            Ok("Summary 1".into()),
            Ok("Summary 2".into()),
        ]));
        let mut windows = HashMap::new();
        // Budget 0.9 * 2500 = 2250 tokens, two 1000-token items per batch
        windows.insert("tiny-".to_string(), 2_500);
        let compactor = compactor(&summarizer).with_profiles(ContextProfiles::with_overrides(&windows));

        let items: Vec<_> = (1..=7)
            .map(|i| ConversationItem::user(format!("{i}").repeat(4_000)))
            .collect();

        let artifact = compactor
            .compact(&items, Some("tiny-model"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summarizer.batch_sizes(), vec![2, 2]);
        assert_eq!(
            artifact.notice_content,
            "Key observations from earlier:\nSummary 1\n\nSummary 2"
        );
        assert!(artifact.batches.iter().all(|b| b.estimated_tokens <= 2_250));
    }

    #[tokio::test]
    async fn test_oversized_single_items_still_submitted() {
        let summarizer = Arc::new(ScriptedSummarizer::always("s"));
        let mut windows = HashMap::new();
        windows.insert("tiny-".to_string(), 100);
        let compactor = compactor(&summarizer).with_profiles(ContextProfiles::with_overrides(&windows));

        let items: Vec<_> = (0..6)
            .map(|_| ConversationItem::user("x".repeat(4_000)))
            .collect();

        let artifact = compactor
            .compact(&items, Some("tiny-x"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summarizer.batch_sizes(), vec![1, 1, 1]);
        assert_eq!(artifact.compacted_items, 3);
        assert_eq!(artifact.source, NoticeSource::Summarized);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_summaries() {
        let summarizer = Arc::new(ScriptedSummarizer::scripted(vec![
            Err(SummarizeError::Provider("timeout".into())),
            Ok("second half".into()),
        ]));
        let mut windows = HashMap::new();
        windows.insert("tiny-".to_string(), 2_500);
        let compactor = compactor(&summarizer).with_profiles(ContextProfiles::with_overrides(&windows));

        let items: Vec<_> = (0..7)
            .map(|_| ConversationItem::user("y".repeat(4_000)))
            .collect();

        let artifact = compactor
            .compact(&items, Some("tiny-model"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.notice_content, "Key observations from earlier:\nsecond half");
        assert!(matches!(artifact.batches[0].outcome, BatchOutcome::Failed(_)));
        assert!(matches!(artifact.batches[1].outcome, BatchOutcome::Summarized(_)));
    }

    #[tokio::test]
    async fn test_whitespace_summaries_use_default_notice() {
        let summarizer = Arc::new(ScriptedSummarizer::always("   \n"));
        let artifact = compactor(&summarizer)
            .compact(&seven_items(), Some("gpt-5"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(artifact.notice_content, DEFAULT_NOTICE);
        assert!(matches!(artifact.batches[0].outcome, BatchOutcome::Empty));
    }

    #[tokio::test]
    async fn test_split_moves_left_over_tool_result() {
        let summarizer = Arc::new(ScriptedSummarizer::always("s"));
        let items = vec![
            ConversationItem::user("u1"),
            ConversationItem::assistant("a1"),
            ConversationItem::user("u2"),
            ConversationItem::tool_call("c", "shell", json!({"commands": ["ls"]})),
            ConversationItem::tool_result("c", json!("out")),
            ConversationItem::assistant("a2"),
        ];

        let artifact = compactor(&summarizer)
            .compact(&items, Some("gpt-5"), &CancellationToken::new())
            .await
            .unwrap();

        // Natural boundary 3 is a call, so three recent items stay
        assert_eq!(artifact.compacted_items, 3);

        let items = vec![
            ConversationItem::user("u1"),
            ConversationItem::assistant("a1"),
            ConversationItem::tool_call("c", "shell", json!({"commands": ["ls"]})),
            ConversationItem::tool_result("c", json!("out")),
            ConversationItem::user("u2"),
            ConversationItem::assistant("a2"),
        ];
        let artifact = compactor(&summarizer)
            .compact(&items, Some("gpt-5"), &CancellationToken::new())
            .await
            .unwrap();

        // Natural boundary 3 is a result; the call moves into recent with it
        assert_eq!(artifact.compacted_items, 2);
        assert_eq!(&artifact.items_to_add[1..], &items[2..]);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_and_clears_indicator() {
        let (events, mut rx) = EventSink::channel();
        let compactor = HistoryCompactor::new(Arc::new(PendingSummarizer)).with_events(events);
        let cancel = CancellationToken::new();

        let items = seven_items();
        let run = compactor.compact(&items, Some("gpt-5"), &cancel);
        let canceller = async {
            tokio::task::yield_now().await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, canceller);

        assert!(matches!(result, Err(CompactionError::Cancelled)));
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Compacting(true));
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Compacting(false));
    }

    #[tokio::test]
    async fn test_already_cancelled() {
        let summarizer = Arc::new(ScriptedSummarizer::always("s"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = compactor(&summarizer)
            .compact(&seven_items(), Some("gpt-5"), &cancel)
            .await;
        assert!(matches!(result, Err(CompactionError::Cancelled)));
        assert!(summarizer.batch_sizes().is_empty());
    }

    #[test]
    fn test_check() {
        let summarizer = Arc::new(ScriptedSummarizer::default());
        let mut windows = HashMap::new();
        windows.insert("tiny".to_string(), 1_000);
        let compactor = compactor(&summarizer).with_profiles(ContextProfiles::with_overrides(&windows));

        let small = vec![ConversationItem::user("hello")];
        let status = compactor.check(&small, Some("tiny"));
        assert_eq!(status.trigger_tokens, 500);
        assert!(!status.needs_compaction);

        let big = vec![ConversationItem::user("z".repeat(2_000))];
        let status = compactor.check(&big, Some("tiny"));
        assert_eq!(status.total_tokens, 500);
        assert!(status.needs_compaction);
        assert_eq!(status.item_count, 1);
    }

    #[test]
    fn test_config_defaults() {
        let config = CompactionConfig::default();
        assert_eq!(config.recent_items, 3);
        assert_eq!(config.batch_fraction, 0.9);
        assert_eq!(config.trigger_fraction, 0.5);
    }
}
