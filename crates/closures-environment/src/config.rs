// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for closures-environment.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file; `None` keeps closures in memory
    pub database_path: Option<PathBuf>,
    /// HTTP server address
    pub http_addr: SocketAddr,
    /// Maximum number of driver invocations running at once
    pub max_concurrent_executions: usize,
    /// How often the timeout sweep looks for overdue closures
    pub sweep_interval: Duration,
    /// Margin past a closure's timeout before the sweep cancels it
    pub timeout_grace: Duration,
    /// Executable for the `nodejs` runtime
    pub node_binary: PathBuf,
    /// Executable for the `python` runtime
    pub python_binary: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_path = lookup("CLOSURES_DATABASE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let port: u16 = lookup("CLOSURES_HTTP_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let host: IpAddr = lookup("CLOSURES_HTTP_HOST")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("CLOSURES_HTTP_HOST"))?;

        let max_concurrent_executions =
            parse_positive(&lookup, "CLOSURES_MAX_CONCURRENT_EXECUTIONS", 32)?;
        let sweep_interval =
            Duration::from_secs(parse_positive(&lookup, "CLOSURES_SWEEP_INTERVAL_SECS", 5)? as u64);
        let timeout_grace = Duration::from_secs(
            lookup("CLOSURES_TIMEOUT_GRACE_SECS")
                .map(|v| v.parse::<u64>())
                .transpose()
                .map_err(|_| ConfigError::InvalidValue("CLOSURES_TIMEOUT_GRACE_SECS"))?
                .unwrap_or(5),
        );

        let node_binary =
            PathBuf::from(lookup("CLOSURES_NODE_BINARY").unwrap_or_else(|| "node".to_string()));
        let python_binary = PathBuf::from(
            lookup("CLOSURES_PYTHON_BINARY").unwrap_or_else(|| "python3".to_string()),
        );

        Ok(Self {
            database_path,
            http_addr: SocketAddr::new(host, port),
            max_concurrent_executions,
            sweep_interval,
            timeout_grace,
            node_binary,
            python_binary,
        })
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<usize>() {
            Ok(value) if value > 0 => Ok(value),
            _ => Err(ConfigError::InvalidValue(key)),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_path, None);
        assert_eq!(config.http_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.max_concurrent_executions, 32);
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.timeout_grace, Duration::from_secs(5));
        assert_eq!(config.node_binary, PathBuf::from("node"));
        assert_eq!(config.python_binary, PathBuf::from("python3"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("CLOSURES_DATABASE_PATH", ".data/closures.db"),
            ("CLOSURES_HTTP_HOST", "127.0.0.1"),
            ("CLOSURES_HTTP_PORT", "9090"),
            ("CLOSURES_MAX_CONCURRENT_EXECUTIONS", "4"),
            ("CLOSURES_TIMEOUT_GRACE_SECS", "0"),
        ])
        .unwrap();

        assert_eq!(
            config.database_path,
            Some(PathBuf::from(".data/closures.db"))
        );
        assert_eq!(config.http_addr, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.max_concurrent_executions, 4);
        assert_eq!(config.timeout_grace, Duration::ZERO);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("CLOSURES_HTTP_PORT", "eighty")]),
            Err(ConfigError::InvalidPort)
        ));
        assert!(matches!(
            config_from(&[("CLOSURES_MAX_CONCURRENT_EXECUTIONS", "0")]),
            Err(ConfigError::InvalidValue("CLOSURES_MAX_CONCURRENT_EXECUTIONS"))
        ));
    }
}
