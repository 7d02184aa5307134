//! # Configuration Error Types
//!
//! The push path never fails; only setting a buffer up from configuration can.

use thiserror::Error;

/// Errors raised while loading or validating an [`AppendConfig`](crate::AppendConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML source could not be parsed.
    #[error("invalid append buffer config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read.
    #[error("failed to read append buffer config: {0}")]
    Io(#[from] std::io::Error),

    /// Page size below the supported minimum.
    #[error("page size {page_bytes} is below the minimum of {minimum} bytes")]
    PageTooSmall {
        /// Requested page size.
        page_bytes: usize,
        /// Smallest accepted page size.
        minimum: usize,
    },

    /// Page size above the supported maximum.
    #[error("page size {page_bytes} exceeds the maximum of {maximum} bytes")]
    PageTooLarge {
        /// Requested page size.
        page_bytes: usize,
        /// Largest accepted page size.
        maximum: usize,
    },

    /// Page size is not a power of two.
    #[error("page size {0} is not a power of two")]
    PageNotPowerOfTwo(usize),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
