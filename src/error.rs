use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionStoreError),

    #[error("Compaction error: {0}")]
    Compaction(#[from] crate::compaction::CompactionError),

    #[error("Approval error: {0}")]
    Approval(#[from] crate::tool::ApprovalError),
}

impl Error {
    /// The turn was interrupted rather than failing.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Compaction(crate::compaction::CompactionError::Cancelled)
                | Self::Approval(crate::tool::ApprovalError::Cancelled(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
