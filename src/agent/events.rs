use crate::tool::ApprovalPayload;
use tokio::sync::mpsc;

/// Events published to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A tool invocation is waiting on a human decision.
    ApprovalRequested {
        call_id: String,
        payload: ApprovalPayload,
    },
    /// A tool invocation was resolved by policy; kept so the UI can show it later.
    ToolInfoRegistered {
        call_id: String,
        payload: ApprovalPayload,
    },
    /// Compaction in progress indicator.
    Compacting(bool),
    CompactionStatus {
        before: usize,
        after: usize,
    },
}

/// Decision sent back from the UI, correlated by call id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub call_id: String,
    pub approved: bool,
}

impl ApprovalDecision {
    pub fn approve(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            approved: true,
        }
    }

    pub fn deny(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            approved: false,
        }
    }
}

/// Outbound half of the UI channel.
///
/// Sends never fail from the caller's point of view: with no UI attached, or
/// after the UI hung up, events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<AgentEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink with no receiver.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).is_err()
        {
            tracing::trace!("UI event receiver dropped");
        }
    }
}
