pub mod approval;
pub mod guard;
pub mod ignore;
pub mod permissions;
pub mod types;

pub use approval::{ApprovalError, ApprovalGate, ApprovalVerdict, PendingApproval};
pub use guard::{CommandRisk, analyze_command};
pub use ignore::IgnoredPaths;
pub use permissions::{
    ApprovalPolicy, CodeInterpreterPolicy, FileOperationPolicy, PermissionMatrix, PolicyContext,
    PolicyDecision, ShellPolicy,
};
pub use types::*;
