//! # Configuration
//!
//! Tunables for a form session. Hosts either build an [`EngineConfig`] directly,
//! deserialize one, or read it from `FORMFLUX_*` environment variables.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When field validation runs outside of `submit()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValidationMode {
    #[default]
    OnChange,
    OnBlur,
    OnSubmit,
}

impl ValidationMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onchange" | "on_change" | "change" => Some(Self::OnChange),
            "onblur" | "on_blur" | "blur" => Some(Self::OnBlur),
            "onsubmit" | "on_submit" | "submit" => Some(Self::OnSubmit),
            _ => None,
        }
    }
}

/// How schema loading treats dependency cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Reject the schema with `SchemaError::CyclicDependency`.
    #[default]
    Reject,
    /// Accept the schema, report the cycle, and keep cycle members always visible.
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default mode; a schema's own `validationMode` wins.
    pub validation_mode: ValidationMode,
    /// Per-field debounce window for `OnChange` validation, in milliseconds.
    pub debounce_ms: u64,
    /// Maximum async validators in flight across the whole form.
    pub max_concurrent_async: usize,
    /// Field count above which visibility recompute is targeted instead of full.
    pub virtualization_threshold: usize,
    pub cycle_policy: CyclePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::OnChange,
            debounce_ms: 150,
            max_concurrent_async: 4,
            virtualization_threshold: 100,
            cycle_policy: CyclePolicy::Reject,
        }
    }
}

impl EngineConfig {
    /// Reads `FORMFLUX_*` variables (after loading a `.env` file if present).
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("FORMFLUX_VALIDATION_MODE") {
            match ValidationMode::parse(&raw) {
                Some(mode) => config.validation_mode = mode,
                None => tracing::warn!(value = %raw, "Ignoring unknown FORMFLUX_VALIDATION_MODE"),
            }
        }
        if let Some(ms) = env_number("FORMFLUX_DEBOUNCE_MS") {
            config.debounce_ms = ms;
        }
        if let Some(n) = env_number("FORMFLUX_MAX_CONCURRENT_ASYNC") {
            config.max_concurrent_async = (n as usize).max(1);
        }
        if let Some(n) = env_number("FORMFLUX_VIRTUALIZATION_THRESHOLD") {
            config.virtualization_threshold = n as usize;
        }
        if let Ok(raw) = std::env::var("FORMFLUX_CYCLE_POLICY") {
            config.cycle_policy = match raw.trim() {
                "fail_open" | "failopen" => CyclePolicy::FailOpen,
                _ => CyclePolicy::Reject,
            };
        }

        config
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn env_number(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring non-numeric configuration value");
            None
        }
    }
}
