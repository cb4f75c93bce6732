use crate::tool::ToolMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Chat model. Its window decides when compaction triggers.
    pub model: Option<String>,
    /// Model used to summarize history. None disables summarization.
    pub compaction_model: Option<String>,
    pub data_dir: PathBuf,
    /// Session store file. Defaults to `<data_dir>/sessions.json`.
    pub session_path: Option<PathBuf>,
    pub compaction: CompactionSettings,
    pub approval: ApprovalSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("tack"))
            .unwrap_or_else(|| PathBuf::from(".tack"));

        Self {
            model: None,
            compaction_model: None,
            data_dir,
            session_path: None,
            compaction: CompactionSettings::default(),
            approval: ApprovalSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    /// Trailing items kept verbatim. Default: 3
    pub recent_items: usize,
    /// Share of the compaction model's window per summary batch. Default: 0.9
    pub batch_fraction: f64,
    /// Share of the chat model's window that triggers compaction. Default: 0.5
    pub trigger_fraction: f64,
    /// Extra model-prefix → context window entries, checked before built-ins.
    pub context_windows: HashMap<String, usize>,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            recent_items: 3,
            batch_fraction: 0.9,
            trigger_fraction: 0.5,
            context_windows: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    pub mode: ToolMode,
    /// Skip prompts for shell commands that are neither risky nor touch ignored paths.
    pub auto_approve_shell: bool,
    pub auto_approve_code_interpreter: bool,
    /// Skip prompts for file writes/edits/deletes outside ignored paths.
    pub auto_approve_file_edits: bool,
    /// Extra gitignore-style patterns treated as restricted, on top of `.aiignore`.
    pub ignored_paths: Vec<String>,
}

impl Config {
    /// Default config file location.
    #[must_use]
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("tack").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".tack/config.toml"))
    }

    /// Session store file.
    #[must_use]
    pub fn sessions_path(&self) -> PathBuf {
        self.session_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("sessions.json"))
    }

    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `TACK_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("TACK_MODEL").filter(|v| !v.is_empty()) {
            self.model = Some(model);
        }
        if let Some(model) = lookup("TACK_COMPACTION_MODEL").filter(|v| !v.is_empty()) {
            self.compaction_model = Some(model);
        }
        if let Some(path) = lookup("TACK_SESSION_PATH").filter(|v| !v.is_empty()) {
            self.session_path = Some(PathBuf::from(path));
        }
        if is_enabled(lookup("TACK_AUTO_APPROVE_SHELL")) {
            self.approval.auto_approve_shell = true;
        }
        if is_enabled(lookup("TACK_AUTO_APPROVE_CODE_INTERPRETER")) {
            self.approval.auto_approve_code_interpreter = true;
        }
    }
}

fn is_enabled(value: Option<String>) -> bool {
    matches!(value.as_deref().map(str::trim), Some("1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.compaction.recent_items, 3);
        assert_eq!(config.approval.mode, ToolMode::Write);
        assert!(!config.approval.auto_approve_shell);
        assert!(config.sessions_path().ends_with("sessions.json"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(config.model.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
model = "claude-sonnet-4"
compaction_model = "gpt-5-nano"
session_path = "/tmp/tack/sessions.json"

[compaction]
recent_items = 5

[compaction.context_windows]
"my-local" = 32000

[approval]
mode = "agi"
ignored_paths = ["secrets/"]
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(config.compaction.recent_items, 5);
        assert_eq!(config.compaction.batch_fraction, 0.9);
        assert_eq!(config.compaction.context_windows["my-local"], 32_000);
        assert_eq!(config.approval.mode, ToolMode::Agi);
        assert_eq!(config.approval.ignored_paths, vec!["secrets/".to_string()]);
        assert_eq!(
            config.sessions_path(),
            PathBuf::from("/tmp/tack/sessions.json")
        );
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "TACK_COMPACTION_MODEL" => Some("gpt-5-nano".into()),
            "TACK_AUTO_APPROVE_SHELL" => Some("1".into()),
            "TACK_AUTO_APPROVE_CODE_INTERPRETER" => Some("0".into()),
            _ => None,
        });
        assert_eq!(config.compaction_model.as_deref(), Some("gpt-5-nano"));
        assert!(config.approval.auto_approve_shell);
        assert!(!config.approval.auto_approve_code_interpreter);
        assert!(config.model.is_none());
    }
}
