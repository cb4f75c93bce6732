mod events;

pub use events::{AgentEvent, ApprovalDecision, EventSink};

use crate::compaction::{
    CompactionArtifact, CompactionConfig, ContextProfiles, HistoryCompactor, Summarizer,
    TokenCounter,
};
use crate::config::Config;
use crate::conversation::ConversationItem;
use crate::error::Result;
use crate::session::Session;
use crate::tool::{ApprovalGate, IgnoredPaths, PermissionMatrix, ToolRequest};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Call sites the agent loop uses between model turns: keep the session
/// inside the context budget and gate tool execution.
pub struct Agent {
    compactor: HistoryCompactor,
    gate: Arc<ApprovalGate>,
    events: EventSink,
    /// Chat model; its window decides when to compact.
    model: Option<String>,
    /// Model that writes summaries.
    compaction_model: Option<String>,
}

impl Agent {
    pub fn new(compactor: HistoryCompactor, gate: Arc<ApprovalGate>, events: EventSink) -> Self {
        Self {
            compactor,
            gate,
            events,
            model: None,
            compaction_model: None,
        }
    }

    /// Wire up compaction and approvals from `config`, rooted at `working_dir`.
    pub fn from_config(
        config: &Config,
        working_dir: &Path,
        summarizer: Arc<dyn Summarizer>,
        events: EventSink,
    ) -> Self {
        let compactor = HistoryCompactor::new(summarizer)
            .with_config(CompactionConfig::from(&config.compaction))
            .with_profiles(ContextProfiles::with_overrides(
                &config.compaction.context_windows,
            ))
            .with_events(events.clone());

        let ignored = IgnoredPaths::load(working_dir, &config.approval.ignored_paths);
        let permissions = PermissionMatrix::new(config.approval.clone(), ignored);
        let gate = Arc::new(ApprovalGate::new(permissions, events.clone()));

        Self::new(compactor, gate, events)
            .with_model(config.model.clone())
            .with_compaction_model(config.compaction_model.clone())
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_compaction_model(mut self, model: Option<String>) -> Self {
        self.compaction_model = model;
        self
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    #[must_use]
    pub fn compactor(&self) -> &HistoryCompactor {
        &self.compactor
    }

    #[must_use]
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Compact `session` if it is over the chat model's trigger budget.
    ///
    /// Returns the artifact when the log was rewritten.
    pub async fn compact_if_needed(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Option<CompactionArtifact>> {
        let items = session.items().await?;
        let status = self.compactor.check(&items, self.model.as_deref());
        if !status.needs_compaction {
            return Ok(None);
        }

        tracing::info!(
            tokens = status.total_tokens,
            trigger = status.trigger_tokens,
            items = status.item_count,
            "Context over budget"
        );
        self.compact_items(session, &items, status.total_tokens, cancel)
            .await
    }

    /// Compact `session` regardless of budget.
    ///
    /// Returns `None` when there was nothing older than the recent tail to
    /// fold into a notice, or when the log was popped or rewritten while the
    /// summarizer ran. Items appended during compaction are kept after the
    /// new notice.
    pub async fn compact(
        &self,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Result<Option<CompactionArtifact>> {
        let items = session.items().await?;
        let before = TokenCounter::new().estimate(&items);
        self.compact_items(session, &items, before, cancel).await
    }

    async fn compact_items(
        &self,
        session: &Session,
        items: &[ConversationItem],
        before: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<CompactionArtifact>> {
        let artifact = self
            .compactor
            .compact(items, self.compaction_model.as_deref(), cancel)
            .await?;

        if artifact.compacted_items == 0 {
            tracing::debug!(items = items.len(), "Nothing older than the recent tail");
            return Ok(None);
        }

        // One write, so an interrupted turn never sees a half-compacted log
        if !session
            .replace_prefix(items, artifact.items_to_add.clone())
            .await?
        {
            tracing::warn!("Session log changed during compaction, keeping it as is");
            return Ok(None);
        }

        let after = TokenCounter::new().estimate(&artifact.items_to_add);
        self.events
            .emit(AgentEvent::CompactionStatus { before, after });
        tracing::info!(before, after, source = ?artifact.source, "Session compacted");

        Ok(Some(artifact))
    }

    /// Settle whether a tool may run, waiting on the UI when policy asks for it.
    pub async fn authorize_tool(
        &self,
        request: &ToolRequest,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let verdict = self.gate.needs_approval(request);
        Ok(verdict.resolve(cancel).await?)
    }
}
