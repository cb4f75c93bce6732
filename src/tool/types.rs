use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The active execution mode of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    /// Side-effecting tools are refused.
    Read,
    /// Standard interactive mode with prompts for restricted tools.
    #[default]
    Write,
    /// Full autonomy, no prompts.
    Agi,
}

/// Kind of tool asking for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Shell,
    CodeInterpreter,
    FileOperation,
}

impl ApprovalKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::CodeInterpreter => "code_interpreter",
            Self::FileOperation => "file_operation",
        }
    }
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationKind {
    Write,
    Edit,
    Delete,
}

/// What the tool is about to do, shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalPayload {
    Shell {
        commands: Vec<String>,
    },
    CodeInterpreter {
        code: String,
        language: Option<String>,
    },
    FileOperation {
        operation: FileOperationKind,
        path: PathBuf,
        /// Unified diff of the change, when available.
        diff: Option<String>,
    },
}

impl ApprovalPayload {
    #[must_use]
    pub fn kind(&self) -> ApprovalKind {
        match self {
            Self::Shell { .. } => ApprovalKind::Shell,
            Self::CodeInterpreter { .. } => ApprovalKind::CodeInterpreter,
            Self::FileOperation { .. } => ApprovalKind::FileOperation,
        }
    }
}

/// A tool invocation about to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub call_id: String,
    pub payload: ApprovalPayload,
}

impl ToolRequest {
    pub fn new(call_id: impl Into<String>, payload: ApprovalPayload) -> Self {
        Self {
            call_id: call_id.into(),
            payload,
        }
    }

    pub fn shell<I, S>(call_id: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            call_id,
            ApprovalPayload::Shell {
                commands: commands.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn code_interpreter(call_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(
            call_id,
            ApprovalPayload::CodeInterpreter {
                code: code.into(),
                language: None,
            },
        )
    }

    pub fn file_operation(
        call_id: impl Into<String>,
        operation: FileOperationKind,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self::new(
            call_id,
            ApprovalPayload::FileOperation {
                operation,
                path: path.into(),
                diff: None,
            },
        )
    }

    #[must_use]
    pub fn kind(&self) -> ApprovalKind {
        self.payload.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

/// Who settled a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Policy,
    User,
}

/// Retained copy of a request and its outcome, for redisplay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRecord {
    pub call_id: String,
    pub payload: ApprovalPayload,
    pub status: ApprovalStatus,
    pub resolved_by: Option<Resolution>,
    /// Why policy settled it, if it did.
    pub reason: Option<String>,
}

impl ApprovalRecord {
    #[must_use]
    pub fn kind(&self) -> ApprovalKind {
        self.payload.kind()
    }
}
