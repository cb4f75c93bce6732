//! Risky command detection for shell approvals.
//!
//! A match never blocks a command by itself. It only means a human has to
//! look at it, even when shell auto-approval is on.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

/// Result of command analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRisk {
    Safe,
    Risky { reason: Cow<'static, str> },
}

impl CommandRisk {
    #[must_use]
    pub fn is_risky(&self) -> bool {
        matches!(self, Self::Risky { .. })
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Safe => None,
            Self::Risky { reason } => Some(reason),
        }
    }
}

struct RiskPattern {
    regex: Regex,
    reason: &'static str,
}

fn pattern(re: &str, reason: &'static str) -> RiskPattern {
    RiskPattern {
        regex: Regex::new(re).expect("risk pattern regex must be valid"),
        reason,
    }
}

/// Patterns matched against the lowercased command.
static RISK_PATTERNS: Lazy<Vec<RiskPattern>> = Lazy::new(|| {
    vec![
        pattern(
            r"\bgit\b.*\breset\b.*--hard\b",
            "git reset --hard discards uncommitted changes",
        ),
        pattern(
            r"\bgit\b.*\bclean\b.*\s-[a-z]*f",
            "git clean -f permanently deletes untracked files",
        ),
        pattern(
            r"\bgit\s+(checkout|restore)\b.*\s\.(\s|$)",
            "discards all uncommitted changes in working directory",
        ),
        pattern(
            r"\b(drop\s+(table|database)|truncate\s+table)\b",
            "SQL command can permanently delete or modify data",
        ),
        pattern(
            r"\bchmod\b.*\b777\b",
            "chmod 777 makes files world-writable",
        ),
        pattern(
            r"\bdd\b.*\bof=/dev/|>\s*/dev/(sd|nvme|hd)",
            "writing directly to device can corrupt filesystem",
        ),
        pattern(r"\bmkfs\b", "mkfs formats and erases the target device"),
        pattern(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb will crash the system"),
        pattern(
            r">\s*(/etc/(passwd|shadow|hosts)|~/\.ssh/|~/\.(bashrc|zshrc|profile)\b)",
            "overwrites critical system or config file",
        ),
        pattern(
            r"\b(curl|wget)\b.*\|\s*(ba|z)?sh\b",
            "executing remote script without inspection",
        ),
    ]
});

/// Analyze a single shell command.
#[must_use]
pub fn analyze_command(command: &str) -> CommandRisk {
    let lower = command.trim().to_lowercase();

    if is_rm_force_recursive(&lower) {
        return CommandRisk::Risky {
            reason: Cow::Borrowed("rm with force and recursive flags can delete entire directories"),
        };
    }

    if is_git_force_push_main(&lower) {
        return CommandRisk::Risky {
            reason: Cow::Borrowed("force push to main/master can rewrite shared history"),
        };
    }

    if lower.contains("delete from") && !lower.contains("where") {
        return CommandRisk::Risky {
            reason: Cow::Borrowed("DELETE without WHERE removes every row"),
        };
    }

    RISK_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(&lower))
        .map_or(CommandRisk::Safe, |p| CommandRisk::Risky {
            reason: Cow::Borrowed(p.reason),
        })
}

/// First risky command in a batch, with its reason.
#[must_use]
pub fn find_risky(commands: &[String]) -> Option<(&str, CommandRisk)> {
    commands.iter().find_map(|cmd| {
        let risk = analyze_command(cmd);
        risk.is_risky().then_some((cmd.as_str(), risk))
    })
}

fn is_rm_force_recursive(lower: &str) -> bool {
    lower.split(['&', '|', ';']).any(|segment| {
        let mut words = segment.split_whitespace();
        if words.next() != Some("rm") {
            return false;
        }
        let mut force = false;
        let mut recursive = false;
        for arg in words {
            match arg {
                "--force" => force = true,
                "--recursive" => recursive = true,
                short if short.starts_with('-') && !short.starts_with("--") => {
                    force |= short.contains('f');
                    recursive |= short.contains('r');
                }
                _ => {}
            }
        }
        force && recursive
    })
}

fn is_git_force_push_main(lower: &str) -> bool {
    if !lower.contains("git") || !lower.contains("push") {
        return false;
    }
    let has_force = lower.contains("--force") || lower.contains(" -f");
    let to_main = lower.contains("main") || lower.contains("master");
    has_force && to_main
}
