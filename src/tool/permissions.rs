use crate::config::ApprovalSettings;
use crate::tool::guard::find_risky;
use crate::tool::ignore::IgnoredPaths;
use crate::tool::types::{ApprovalKind, ApprovalPayload, ToolMode};
use std::collections::HashMap;
use std::sync::Arc;

/// What policy says about a request before any human sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Approve { reason: String },
    Deny { reason: String },
    /// A human has to decide. The reason, if any, is why auto-approval did not apply.
    Ask { reason: Option<String> },
}

impl PolicyDecision {
    fn approve(reason: impl Into<String>) -> Self {
        Self::Approve {
            reason: reason.into(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }
}

/// Inputs a policy may consult. Passed explicitly on every call.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub settings: &'a ApprovalSettings,
    pub ignored: &'a IgnoredPaths,
}

/// Approval policy for one kind of tool.
pub trait ApprovalPolicy: Send + Sync {
    fn kind(&self) -> ApprovalKind;

    fn evaluate(&self, payload: &ApprovalPayload, ctx: PolicyContext<'_>) -> PolicyDecision;
}

/// Shell commands: auto-approvable unless risky or touching a restricted path.
#[derive(Debug, Default)]
pub struct ShellPolicy;

impl ApprovalPolicy for ShellPolicy {
    fn kind(&self) -> ApprovalKind {
        ApprovalKind::Shell
    }

    fn evaluate(&self, payload: &ApprovalPayload, ctx: PolicyContext<'_>) -> PolicyDecision {
        let ApprovalPayload::Shell { commands } = payload else {
            return PolicyDecision::Ask { reason: None };
        };

        if let Some((command, risk)) = find_risky(commands) {
            return PolicyDecision::Ask {
                reason: Some(format!(
                    "`{command}`: {}",
                    risk.reason().unwrap_or("risky command")
                )),
            };
        }

        if let Some(command) = commands
            .iter()
            .find(|cmd| ctx.ignored.mentions_ignored_path(cmd))
        {
            return PolicyDecision::Ask {
                reason: Some(format!("`{command}` mentions a restricted path")),
            };
        }

        if ctx.settings.auto_approve_shell {
            PolicyDecision::approve("shell auto-approve is enabled")
        } else {
            PolicyDecision::Ask { reason: None }
        }
    }
}

/// Code interpreter: only the global switch applies.
#[derive(Debug, Default)]
pub struct CodeInterpreterPolicy;

impl ApprovalPolicy for CodeInterpreterPolicy {
    fn kind(&self) -> ApprovalKind {
        ApprovalKind::CodeInterpreter
    }

    fn evaluate(&self, _payload: &ApprovalPayload, ctx: PolicyContext<'_>) -> PolicyDecision {
        if ctx.settings.auto_approve_code_interpreter {
            PolicyDecision::approve("code interpreter auto-approve is enabled")
        } else {
            PolicyDecision::Ask { reason: None }
        }
    }
}

/// File writes, edits and deletes.
#[derive(Debug, Default)]
pub struct FileOperationPolicy;

impl ApprovalPolicy for FileOperationPolicy {
    fn kind(&self) -> ApprovalKind {
        ApprovalKind::FileOperation
    }

    fn evaluate(&self, payload: &ApprovalPayload, ctx: PolicyContext<'_>) -> PolicyDecision {
        let ApprovalPayload::FileOperation { path, .. } = payload else {
            return PolicyDecision::Ask { reason: None };
        };

        if ctx.ignored.escapes_workspace(path) {
            return PolicyDecision::deny(format!(
                "Path '{}' is outside the workspace ({})",
                path.display(),
                ctx.ignored.root().display()
            ));
        }
        if ctx.ignored.is_ignored(path) {
            return PolicyDecision::deny(format!(
                "Operation restricted by .aiignore: {}",
                path.display()
            ));
        }

        if ctx.settings.auto_approve_file_edits {
            PolicyDecision::approve("file edit auto-approve is enabled")
        } else {
            PolicyDecision::Ask { reason: None }
        }
    }
}

/// Mode plus per-kind policies.
#[derive(Clone)]
pub struct PermissionMatrix {
    mode: ToolMode,
    settings: ApprovalSettings,
    ignored: IgnoredPaths,
    policies: HashMap<ApprovalKind, Arc<dyn ApprovalPolicy>>,
}

impl std::fmt::Debug for PermissionMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionMatrix")
            .field("mode", &self.mode)
            .field("settings", &self.settings)
            .field("ignored", &self.ignored.root())
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PermissionMatrix {
    /// Matrix with the built-in policy for every kind.
    #[must_use]
    pub fn new(settings: ApprovalSettings, ignored: IgnoredPaths) -> Self {
        let mut matrix = Self {
            mode: settings.mode,
            settings,
            ignored,
            policies: HashMap::new(),
        };
        matrix.set_policy(Arc::new(ShellPolicy));
        matrix.set_policy(Arc::new(CodeInterpreterPolicy));
        matrix.set_policy(Arc::new(FileOperationPolicy));
        matrix
    }

    /// Replace the policy for its kind.
    pub fn set_policy(&mut self, policy: Arc<dyn ApprovalPolicy>) {
        self.policies.insert(policy.kind(), policy);
    }

    #[must_use]
    pub fn mode(&self) -> ToolMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ToolMode) {
        self.mode = mode;
    }

    #[must_use]
    pub fn ignored(&self) -> &IgnoredPaths {
        &self.ignored
    }

    pub fn evaluate(&self, payload: &ApprovalPayload) -> PolicyDecision {
        let kind = payload.kind();
        if self.mode == ToolMode::Read {
            return PolicyDecision::deny(format!("{kind} is blocked in Read mode"));
        }

        let ctx = PolicyContext {
            settings: &self.settings,
            ignored: &self.ignored,
        };
        let decision = match self.policies.get(&kind) {
            Some(policy) => policy.evaluate(payload, ctx),
            None => PolicyDecision::Ask { reason: None },
        };

        match decision {
            PolicyDecision::Ask { .. } if self.mode == ToolMode::Agi => {
                PolicyDecision::approve("agi mode approves everything")
            }
            other => other,
        }
    }
}
