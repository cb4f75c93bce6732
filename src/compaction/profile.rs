//! Model context window lookup.
//!
//! Values are conservative. Unknown models fall back to a default window
//! instead of failing, so budget math always has a number to work with.
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

/// Window used for unknown or absent model names.
pub const DEFAULT_CONTEXT_LIMIT: usize = 128_000;

/// Fraction of the window at which compaction triggers when none is given.
pub const DEFAULT_TRIGGER_FRACTION: f64 = 0.5;

const MIN_TRIGGER_FRACTION: f64 = 0.5;
const MAX_TRIGGER_FRACTION: f64 = 0.95;

/// Built-in prefixes, most specific first.
const BUILTIN_PROFILES: &[(&str, usize)] = &[
    ("gpt-4", 128_000),
    ("gpt-", 200_000),
    ("claude-3", 200_000),
    ("claude-", 1_000_000),
    ("gemini-", 1_000_000),
    // Local models often default to 4k-8k
    ("ollama-", 8_000),
];

/// Context budget for a model family.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelContextProfile {
    pub max_tokens: usize,
    pub trigger_fraction: f64,
}

impl ModelContextProfile {
    /// Trigger point for this profile, with `fraction` clamped to `[0.5, 0.95]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn trigger_tokens(&self, fraction: f64) -> usize {
        let fraction = if fraction.is_nan() {
            MIN_TRIGGER_FRACTION
        } else {
            fraction.clamp(MIN_TRIGGER_FRACTION, MAX_TRIGGER_FRACTION)
        };
        (self.max_tokens as f64 * fraction).floor() as usize
    }
}

/// Prefix-keyed registry of context windows.
///
/// Configured overrides are consulted before the built-in table.
#[derive(Debug, Clone, Default)]
pub struct ContextProfiles {
    overrides: Vec<(String, usize)>,
}

impl ContextProfiles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with extra prefix → window entries. Longer prefixes win.
    #[must_use]
    pub fn with_overrides(overrides: &HashMap<String, usize>) -> Self {
        let mut overrides: Vec<(String, usize)> = overrides
            .iter()
            .map(|(prefix, limit)| (prefix.to_lowercase(), *limit))
            .collect();
        overrides.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { overrides }
    }

    /// Context window for a model name (case-insensitive prefix match).
    #[must_use]
    pub fn limit_for(&self, model: Option<&str>) -> usize {
        let Some(model) = model.filter(|m| !m.trim().is_empty()) else {
            return DEFAULT_CONTEXT_LIMIT;
        };
        let name = model.to_lowercase();

        self.overrides
            .iter()
            .map(|(prefix, limit)| (prefix.as_str(), *limit))
            .chain(BUILTIN_PROFILES.iter().map(|&(prefix, limit)| (prefix, limit)))
            .find(|(prefix, _)| name.starts_with(prefix))
            .map_or(DEFAULT_CONTEXT_LIMIT, |(_, limit)| limit)
    }

    #[must_use]
    pub fn profile_for(&self, model: Option<&str>) -> ModelContextProfile {
        ModelContextProfile {
            max_tokens: self.limit_for(model),
            trigger_fraction: DEFAULT_TRIGGER_FRACTION,
        }
    }

    /// `floor(limit_for(model) * fraction)`, fraction clamped to `[0.5, 0.95]`.
    #[must_use]
    pub fn trigger_tokens(&self, model: Option<&str>, fraction: f64) -> usize {
        self.profile_for(model).trigger_tokens(fraction)
    }
}

/// Built-in window lookup without overrides.
#[must_use]
pub fn limit_for(model: Option<&str>) -> usize {
    ContextProfiles::new().limit_for(model)
}

/// Built-in trigger lookup without overrides.
#[must_use]
pub fn trigger_tokens(model: Option<&str>, fraction: f64) -> usize {
    ContextProfiles::new().trigger_tokens(model, fraction)
}
