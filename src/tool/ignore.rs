//! Restricted paths from `.aiignore` and configured patterns.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Component, Path, PathBuf};

pub const AIIGNORE_FILE: &str = ".aiignore";

/// Gitignore-syntax matcher rooted at the workspace.
#[derive(Debug, Clone)]
pub struct IgnoredPaths {
    root: PathBuf,
    matcher: Gitignore,
}

impl IgnoredPaths {
    /// Matcher that restricts nothing.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            matcher: Gitignore::empty(),
            root,
        }
    }

    /// Load `<root>/.aiignore` (if present) plus `patterns`.
    ///
    /// Invalid lines are skipped with a warning rather than failing the load.
    pub fn load(root: impl Into<PathBuf>, patterns: &[String]) -> Self {
        let root = root.into();
        let mut builder = GitignoreBuilder::new(&root);

        let aiignore = root.join(AIIGNORE_FILE);
        if aiignore.is_file()
            && let Some(err) = builder.add(&aiignore)
        {
            tracing::warn!(path = %aiignore.display(), "Problem reading .aiignore: {err}");
        }

        for pattern in patterns {
            if let Err(err) = builder.add_line(None, pattern) {
                tracing::warn!(pattern = %pattern, "Invalid ignored path pattern: {err}");
            }
        }

        let matcher = builder.build().unwrap_or_else(|err| {
            tracing::warn!("Failed to build ignored path matcher: {err}");
            Gitignore::empty()
        });

        Self { root, matcher }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.matcher.is_empty()
    }

    /// Path relative to the workspace root, or None if it escapes it.
    #[must_use]
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        normalize(&joined)
            .strip_prefix(normalize(&self.root))
            .ok()
            .map(Path::to_path_buf)
    }

    #[must_use]
    pub fn escapes_workspace(&self, path: &Path) -> bool {
        self.relative(path).is_none()
    }

    /// Whether `path`, or any directory containing it, is restricted.
    /// Paths outside the workspace are never matched here.
    #[must_use]
    pub fn is_ignored(&self, path: &Path) -> bool {
        if self.matcher.is_empty() {
            return false;
        }
        let Some(rel) = self.relative(path) else {
            return false;
        };
        if rel.as_os_str().is_empty() {
            return false;
        }
        let is_dir = self.root.join(&rel).is_dir();
        self.matcher
            .matched_path_or_any_parents(&rel, is_dir)
            .is_ignore()
    }

    /// Whether any path-like word in a shell command is restricted.
    #[must_use]
    pub fn mentions_ignored_path(&self, command: &str) -> bool {
        if self.matcher.is_empty() {
            return false;
        }
        command
            .split(|c: char| c.is_whitespace() || ";|&<>()'\"`=,".contains(c))
            .filter(|word| !word.is_empty() && !word.starts_with('-'))
            .any(|word| self.is_ignored(Path::new(word)))
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_aiignore_and_extra_patterns() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(AIIGNORE_FILE), "secrets/\n*.pem\n").unwrap();
        std::fs::create_dir(dir.path().join("secrets")).unwrap();

        let ignored = IgnoredPaths::load(dir.path(), &[".env".to_string()]);
        assert!(ignored.is_ignored(Path::new("secrets")));
        assert!(ignored.is_ignored(Path::new("secrets/api.key")));
        assert!(ignored.is_ignored(Path::new("certs/server.pem")));
        assert!(ignored.is_ignored(&dir.path().join(".env")));
        assert!(!ignored.is_ignored(Path::new("src/main.rs")));
    }

    #[test]
    fn test_no_aiignore_restricts_nothing() {
        let dir = tempdir().unwrap();
        let ignored = IgnoredPaths::load(dir.path(), &[]);
        assert!(ignored.is_empty());
        assert!(!ignored.is_ignored(Path::new("anything")));
        assert!(!ignored.mentions_ignored_path("cat anything"));
    }

    #[test]
    fn test_escapes_workspace() {
        let dir = tempdir().unwrap();
        let ignored = IgnoredPaths::empty(dir.path());
        assert!(!ignored.escapes_workspace(Path::new("src/lib.rs")));
        assert!(!ignored.escapes_workspace(Path::new("src/../Cargo.toml")));
        assert!(ignored.escapes_workspace(Path::new("../outside.txt")));
        assert!(ignored.escapes_workspace(Path::new("/etc/passwd")));
    }

    #[test]
    fn test_mentions_ignored_path() {
        let dir = tempdir().unwrap();
        let ignored = IgnoredPaths::load(dir.path(), &["secrets/".to_string(), ".env".to_string()]);
        std::fs::create_dir(dir.path().join("secrets")).unwrap();

        assert!(ignored.mentions_ignored_path("cat secrets/token"));
        assert!(ignored.mentions_ignored_path("grep KEY .env"));
        assert!(ignored.mentions_ignored_path("echo hi > .env"));
        assert!(!ignored.mentions_ignored_path("ls -la src"));
    }
}
