//! # Append Buffer Configuration
//!
//! Sizing parameters, loaded once at startup from TOML.
//!
//! ```toml
//! initial_capacity = 4096
//! page_bytes = 4096
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::page::DEFAULT_PAGE_BYTES;

/// Sizing for an [`AppendBuffer`](crate::AppendBuffer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppendConfig {
    /// Elements pre-allocated in the primary buffer.
    pub initial_capacity: usize,
    /// Size of each overflow page block in bytes.
    pub page_bytes: usize,
}

impl AppendConfig {
    /// Smallest accepted page size.
    pub const MIN_PAGE_BYTES: usize = 256;

    /// Largest accepted page size (1 MiB).
    pub const MAX_PAGE_BYTES: usize = 1 << 20;

    /// Config with the given primary capacity and default page size.
    #[must_use]
    pub const fn with_capacity(initial_capacity: usize) -> Self {
        Self {
            initial_capacity,
            page_bytes: DEFAULT_PAGE_BYTES,
        }
    }

    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and the page-size
    /// variants when validation fails.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise
    /// as [`AppendConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks the page size bounds.
    ///
    /// # Errors
    ///
    /// Returns the first page-size rule that is violated.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.page_bytes < Self::MIN_PAGE_BYTES {
            return Err(ConfigError::PageTooSmall {
                page_bytes: self.page_bytes,
                minimum: Self::MIN_PAGE_BYTES,
            });
        }
        if self.page_bytes > Self::MAX_PAGE_BYTES {
            return Err(ConfigError::PageTooLarge {
                page_bytes: self.page_bytes,
                maximum: Self::MAX_PAGE_BYTES,
            });
        }
        if !self.page_bytes.is_power_of_two() {
            return Err(ConfigError::PageNotPowerOfTwo(self.page_bytes));
        }
        Ok(())
    }
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
