//! Configuration
//!
//! Engine configuration, loading, and startup validation.

pub mod loader;
pub mod types;
pub mod validator;

use crate::kernel::pages;
use std::sync::OnceLock;
use types::{FreezeConfig, FreezeError, Result};

/// Process-wide configuration, fixed on first use.
static CONFIG: OnceLock<FreezeConfig> = OnceLock::new();

/// Install the process-wide configuration.
///
/// Must run before the first freeze; the engine reads the configuration once.
pub fn init(config: FreezeConfig) -> Result<()> {
    validator::validate_config(&config, pages::os_page_size())?;
    CONFIG
        .set(config)
        .map_err(|_| FreezeError::Config("configuration already initialized".to_string()))?;
    log::info!("pagefreeze configuration installed");
    Ok(())
}

/// The active configuration.
///
/// Falls back to `PAGEFREEZE_*` environment variables, then to defaults, when
/// [`init`] was never called. An invalid environment is logged and ignored.
pub fn current() -> &'static FreezeConfig {
    CONFIG.get_or_init(|| {
        let config = match FreezeConfig::from_env() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring PAGEFREEZE_* environment: {}", e);
                return FreezeConfig::default();
            }
        };
        match validator::validate_config(&config, pages::os_page_size()) {
            Ok(_) => config,
            Err(e) => {
                log::warn!("Ignoring invalid PAGEFREEZE_* environment: {}", e);
                FreezeConfig::default()
            }
        }
    })
}
