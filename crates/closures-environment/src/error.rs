// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for closures-environment.

use closures_core::CoreError;
use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// No driver is registered for the runtime id.
    #[error("Unsupported runtime: '{0}'")]
    UnsupportedRuntime(String),

    /// Closure store operation failed.
    #[error("{0}")]
    Core(#[from] CoreError),

    /// Driver failed outside of script execution.
    #[error("Driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable error code, shared with [`CoreError::error_code`] for store errors.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION_ERROR",
            Self::UnsupportedRuntime(_) => "UNSUPPORTED_RUNTIME",
            Self::Core(e) => e.error_code(),
            Self::Driver(_) => "DRIVER_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::UnsupportedRuntime("ruby".to_string()).error_code(),
            "UNSUPPORTED_RUNTIME"
        );
        let core = Error::from(CoreError::ClosureNotFound {
            closure_id: "c-1".to_string(),
        });
        assert_eq!(core.error_code(), "CLOSURE_NOT_FOUND");
        assert_eq!(core.to_string(), "Closure 'c-1' not found");
    }
}
