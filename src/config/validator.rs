// Config Validation
// Startup validation of the freeze engine configuration.
// Strict mode fails fast on errors and on warnings; permissive mode only fails on errors.

use crate::config::types::{FreezeConfig, FreezeError, Result};

/// Largest granularity accepted without a warning (2 MiB, one x86_64 huge page)
const LARGE_GRANULARITY: usize = 2 * 1024 * 1024;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate config against the host page size.
/// Errors are always fatal; warnings are fatal in strict mode.
pub fn validate_config(config: &FreezeConfig, os_page_size: usize) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_page_size(config, os_page_size, &mut result);
    validate_locking(config, &mut result);

    if !result.is_valid() {
        return Err(FreezeError::Config(format!(
            "Config validation failed:\n{}",
            result.errors.join("\n")
        )));
    }

    if config.strict_mode && !result.warnings.is_empty() {
        return Err(FreezeError::Config(format!(
            "Config validation failed in strict mode:\n{}",
            result.warnings.join("\n")
        )));
    }

    for warning in &result.warnings {
        log::warn!("{}", warning);
    }

    Ok(result)
}

fn validate_page_size(config: &FreezeConfig, os_page_size: usize, result: &mut ValidationResult) {
    let Some(page_size) = config.page_size else {
        return;
    };

    if page_size == 0 {
        result.add_error("page_size cannot be zero".to_string());
        return;
    }

    if !page_size.is_power_of_two() {
        result.add_error(format!("page_size {} is not a power of two", page_size));
    }

    // mprotect only accepts page-aligned addresses
    if page_size % os_page_size != 0 {
        result.add_error(format!(
            "page_size {} is not a multiple of the OS page size {}",
            page_size, os_page_size
        ));
    }

    if page_size > LARGE_GRANULARITY {
        result.add_warning(format!(
            "page_size {} exceeds {} bytes; every frozen value will map at least this much",
            page_size, LARGE_GRANULARITY
        ));
    }
}

fn validate_locking(config: &FreezeConfig, result: &mut ValidationResult) {
    if !config.lock_pages {
        return;
    }

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit writes into a properly initialized rlimit struct.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut limit) };
    if rc != 0 {
        result.add_warning(format!(
            "lock_pages enabled but RLIMIT_MEMLOCK is unreadable: {}",
            std::io::Error::last_os_error()
        ));
    } else if limit.rlim_cur != libc::RLIM_INFINITY && limit.rlim_cur < LARGE_GRANULARITY as libc::rlim_t {
        result.add_warning(format!(
            "lock_pages enabled but RLIMIT_MEMLOCK is only {} bytes; mlock will fail early",
            limit.rlim_cur
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OS_PAGE: usize = 4096;

    #[test]
    fn default_config_is_valid() {
        let result = validate_config(&FreezeConfig::default(), OS_PAGE).unwrap();
        assert!(result.is_valid());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let config = FreezeConfig {
            page_size: Some(0),
            ..Default::default()
        };
        assert!(validate_config(&config, OS_PAGE).is_err());
    }

    #[test]
    fn unaligned_page_size_is_rejected() {
        let config = FreezeConfig {
            page_size: Some(6000),
            ..Default::default()
        };
        let err = validate_config(&config, OS_PAGE).unwrap_err();
        assert!(err.to_string().contains("power of two"));
    }

    #[test]
    fn page_size_smaller_than_os_page_is_rejected() {
        let config = FreezeConfig {
            page_size: Some(2048),
            ..Default::default()
        };
        let err = validate_config(&config, OS_PAGE).unwrap_err();
        assert!(err.to_string().contains("multiple of the OS page size"));
    }

    #[test]
    fn page_size_multiple_is_accepted() {
        let config = FreezeConfig {
            page_size: Some(OS_PAGE * 4),
            ..Default::default()
        };
        assert!(validate_config(&config, OS_PAGE).unwrap().is_valid());
    }

    #[test]
    fn huge_granularity_warns_in_permissive_mode() {
        let config = FreezeConfig {
            page_size: Some(4 * 1024 * 1024),
            ..Default::default()
        };
        let result = validate_config(&config, OS_PAGE).unwrap();
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn huge_granularity_fails_in_strict_mode() {
        let config = FreezeConfig {
            page_size: Some(4 * 1024 * 1024),
            strict_mode: true,
            ..Default::default()
        };
        assert!(validate_config(&config, OS_PAGE).is_err());
    }
}
