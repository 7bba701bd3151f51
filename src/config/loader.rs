/// Configuration loading from JSON files, JSON strings and PAGEFREEZE_* environment variables
use crate::config::types::{FreezeConfig, FreezeError, Result};
use std::path::Path;

pub const ENV_LOCK_PAGES: &str = "PAGEFREEZE_LOCK_PAGES";
pub const ENV_PAGE_SIZE: &str = "PAGEFREEZE_PAGE_SIZE";
pub const ENV_STRICT_MODE: &str = "PAGEFREEZE_STRICT_MODE";

impl FreezeConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FreezeError::Config(format!("Invalid config JSON: {}", e)))
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FreezeError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Build configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup (environment or test map).
    /// Unset keys leave the current value untouched.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_LOCK_PAGES) {
            self.lock_pages = parse_flag(ENV_LOCK_PAGES, &value)?;
        }

        if let Some(value) = lookup(ENV_STRICT_MODE) {
            self.strict_mode = parse_flag(ENV_STRICT_MODE, &value)?;
        }

        if let Some(value) = lookup(ENV_PAGE_SIZE) {
            let trimmed = value.trim();
            self.page_size = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.parse::<usize>().map_err(|e| {
                    FreezeError::Config(format!("{}={} is not a byte count: {}", ENV_PAGE_SIZE, value, e))
                })?)
            };
        }

        Ok(self)
    }

    /// Serialize to pretty JSON (used by the CLI)
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FreezeError::Config(format!("Failed to encode config: {}", e)))
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(FreezeError::Config(format!(
            "{}={} is not a boolean (use true/false/1/0)",
            key, other
        ))),
    }
}
