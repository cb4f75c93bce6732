//! Human-in-the-loop gate in front of side-effecting tools.
//!
//! A request is either settled by policy on the spot or parked until an
//! [`ApprovalDecision`] with the same call id arrives. There is no timeout;
//! callers bound the wait with a cancellation token.

use crate::agent::{AgentEvent, ApprovalDecision, EventSink};
use crate::tool::permissions::{PermissionMatrix, PolicyDecision};
use crate::tool::types::{
    ApprovalRecord, ApprovalStatus, Resolution, ToolMode, ToolRequest,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval wait cancelled for {0}")]
    Cancelled(String),

    #[error("Approval gate dropped before {0} was decided")]
    Abandoned(String),
}

/// Immediate answer from [`ApprovalGate::needs_approval`].
#[derive(Debug)]
pub enum ApprovalVerdict {
    Approved,
    Denied { reason: String },
    Pending(PendingApproval),
}

impl ApprovalVerdict {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    /// Resolve to a final yes/no, waiting if needed.
    pub async fn resolve(self, cancel: &CancellationToken) -> Result<bool, ApprovalError> {
        match self {
            Self::Approved => Ok(true),
            Self::Denied { .. } => Ok(false),
            Self::Pending(pending) => pending.wait(cancel).await,
        }
    }
}

/// Handle on a request waiting for a human.
#[derive(Debug)]
pub struct PendingApproval {
    call_id: String,
    rx: oneshot::Receiver<bool>,
}

impl PendingApproval {
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Wait for the decision. Cancelling leaves the request pending in the gate.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<bool, ApprovalError> {
        let Self { call_id, rx } = self;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ApprovalError::Cancelled(call_id)),
            decision = rx => decision.map_err(|_| ApprovalError::Abandoned(call_id)),
        }
    }
}

#[derive(Debug)]
struct GateState {
    permissions: PermissionMatrix,
    records: HashMap<String, ApprovalRecord>,
    waiters: HashMap<String, Vec<oneshot::Sender<bool>>>,
    approved: HashSet<String>,
}

/// Tracks in-flight and settled approval requests by call id.
pub struct ApprovalGate {
    state: Mutex<GateState>,
    events: EventSink,
}

impl ApprovalGate {
    pub fn new(permissions: PermissionMatrix, events: EventSink) -> Self {
        Self {
            state: Mutex::new(GateState {
                permissions,
                records: HashMap::new(),
                waiters: HashMap::new(),
                approved: HashSet::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn mode(&self) -> ToolMode {
        self.lock().permissions.mode()
    }

    pub fn set_mode(&self, mode: ToolMode) {
        self.lock().permissions.set_mode(mode);
    }

    /// Decide whether `request` may run now.
    ///
    /// A call id approved earlier in this run short-circuits to `Approved`.
    /// Asking again while a prompt is open joins that prompt instead of
    /// opening a second one.
    pub fn needs_approval(&self, request: &ToolRequest) -> ApprovalVerdict {
        let call_id = request.call_id.as_str();
        let mut state = self.lock();

        if state.approved.contains(call_id) {
            tracing::debug!(call_id, "Call already approved");
            return ApprovalVerdict::Approved;
        }

        if let Some(waiters) = state.waiters.get_mut(call_id) {
            waiters.retain(|tx| !tx.is_closed());
            if !waiters.is_empty() {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                return ApprovalVerdict::Pending(PendingApproval {
                    call_id: call_id.to_string(),
                    rx,
                });
            }
        }

        let decision = state.permissions.evaluate(&request.payload);
        let (status, resolved_by, reason) = match &decision {
            PolicyDecision::Approve { reason } => (
                ApprovalStatus::Approved,
                Some(Resolution::Policy),
                Some(reason.clone()),
            ),
            PolicyDecision::Deny { reason } => (
                ApprovalStatus::Denied,
                Some(Resolution::Policy),
                Some(reason.clone()),
            ),
            PolicyDecision::Ask { reason } => (ApprovalStatus::Pending, None, reason.clone()),
        };

        state.records.insert(
            call_id.to_string(),
            ApprovalRecord {
                call_id: call_id.to_string(),
                payload: request.payload.clone(),
                status,
                resolved_by,
                reason,
            },
        );

        let verdict = match decision {
            PolicyDecision::Approve { reason } => {
                tracing::debug!(call_id, kind = %request.kind(), %reason, "Auto-approved");
                state.approved.insert(call_id.to_string());
                ApprovalVerdict::Approved
            }
            PolicyDecision::Deny { reason } => {
                tracing::debug!(call_id, kind = %request.kind(), %reason, "Auto-denied");
                ApprovalVerdict::Denied { reason }
            }
            PolicyDecision::Ask { .. } => {
                let (tx, rx) = oneshot::channel();
                state.waiters.insert(call_id.to_string(), vec![tx]);
                ApprovalVerdict::Pending(PendingApproval {
                    call_id: call_id.to_string(),
                    rx,
                })
            }
        };
        drop(state);

        let event = if verdict.is_pending() {
            AgentEvent::ApprovalRequested {
                call_id: call_id.to_string(),
                payload: request.payload.clone(),
            }
        } else {
            AgentEvent::ToolInfoRegistered {
                call_id: call_id.to_string(),
                payload: request.payload.clone(),
            }
        };
        self.events.emit(event);

        verdict
    }

    /// Apply a decision from the UI. The first decision for a call id wins;
    /// later ones, and decisions nobody is waiting for, are dropped.
    ///
    /// Returns whether the decision was applied.
    pub fn resolve(&self, decision: ApprovalDecision) -> bool {
        let ApprovalDecision { call_id, approved } = decision;
        let mut state = self.lock();

        let Some(waiters) = state.waiters.remove(&call_id) else {
            tracing::debug!(call_id = %call_id, "Dropping approval decision with no waiter");
            return false;
        };
        let live: Vec<_> = waiters.into_iter().filter(|tx| !tx.is_closed()).collect();
        if live.is_empty() {
            tracing::debug!(call_id = %call_id, "Dropping approval decision, waiters gone");
            return false;
        }

        if let Some(record) = state.records.get_mut(&call_id) {
            record.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            };
            record.resolved_by = Some(Resolution::User);
        }
        if approved {
            state.approved.insert(call_id.clone());
        }
        drop(state);

        tracing::debug!(call_id = %call_id, approved, "Approval decided");
        for tx in live {
            let _ = tx.send(approved);
        }
        true
    }

    /// Feed decisions from the UI until the channel closes or `cancel` fires.
    pub async fn run_decisions(
        &self,
        mut rx: mpsc::UnboundedReceiver<ApprovalDecision>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                decision = rx.recv() => match decision {
                    Some(decision) => {
                        self.resolve(decision);
                    }
                    None => break,
                },
            }
        }
    }

    /// The retained request and its outcome, for redisplay.
    #[must_use]
    pub fn record(&self, call_id: &str) -> Option<ApprovalRecord> {
        self.lock().records.get(call_id).cloned()
    }

    #[must_use]
    pub fn is_approved(&self, call_id: &str) -> bool {
        self.lock().approved.contains(call_id)
    }

    /// Requests someone is still waiting on. A request whose waits were all
    /// cancelled keeps its `Pending` record but is not counted.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock()
            .waiters
            .values()
            .filter(|txs| txs.iter().any(|tx| !tx.is_closed()))
            .count()
    }
}
