// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for closures-environment.
//!
//! [`EnvironmentRuntime`] runs the HTTP API and the timeout monitor inside an
//! existing tokio application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use closures_core::ClosureStore;
//! use closures_environment::driver::JsDriver;
//! use closures_environment::registry::DriverRegistry;
//! use closures_environment::runtime::EnvironmentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = DriverRegistry::new().with_driver("js", Arc::new(JsDriver::new()));
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .store(ClosureStore::in_memory())
//!         .registry(Arc::new(registry))
//!         .bind_addr("127.0.0.1:8080".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use closures_core::ClosureStore;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::executor::{DEFAULT_MAX_CONCURRENT_EXECUTIONS, ExecutionCoordinator};
use crate::registry::DriverRegistry;
use crate::server::{AppState, run_server_with_shutdown};
use crate::timeout_monitor::{TimeoutMonitor, TimeoutMonitorConfig};

/// Builder for creating an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeBuilder {
    store: Option<ClosureStore>,
    registry: Option<Arc<DriverRegistry>>,
    bind_addr: SocketAddr,
    max_concurrent_executions: usize,
    sweep_interval: Duration,
    timeout_grace: Duration,
}

impl Default for EnvironmentRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            registry: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            sweep_interval: Duration::from_secs(5),
            timeout_grace: Duration::from_secs(5),
        }
    }
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the closure store (required).
    pub fn store(mut self, store: ClosureStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the driver registry (required).
    pub fn registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: `0.0.0.0:8080`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the maximum number of simultaneous driver invocations.
    ///
    /// Default: 32
    pub fn max_concurrent_executions(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    /// Set the timeout monitor poll interval.
    ///
    /// Default: 5 seconds
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the margin past a closure's timeout before the monitor cancels it.
    ///
    /// Default: 5 seconds
    pub fn timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = grace;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EnvironmentRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        if self.max_concurrent_executions == 0 {
            anyhow::bail!("max_concurrent_executions must be positive");
        }

        Ok(EnvironmentRuntimeConfig {
            store,
            registry,
            bind_addr: self.bind_addr,
            max_concurrent_executions: self.max_concurrent_executions,
            monitor_config: TimeoutMonitorConfig {
                poll_interval: self.sweep_interval,
                timeout_grace: self.timeout_grace,
            },
        })
    }
}

/// Configuration for an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeConfig {
    store: ClosureStore,
    registry: Arc<DriverRegistry>,
    bind_addr: SocketAddr,
    max_concurrent_executions: usize,
    monitor_config: TimeoutMonitorConfig,
}

impl EnvironmentRuntimeConfig {
    /// Start the runtime, spawning the HTTP server and the timeout monitor.
    pub async fn start(self) -> Result<EnvironmentRuntime> {
        let coordinator = ExecutionCoordinator::with_max_concurrent(
            self.store.clone(),
            self.registry.clone(),
            self.max_concurrent_executions,
        );
        let state = Arc::new(AppState::new(coordinator.clone()));

        let monitor = TimeoutMonitor::new(
            self.store.clone(),
            coordinator.in_flight().clone(),
            self.monitor_config,
        );
        let monitor_shutdown = monitor.shutdown_handle();
        let monitor_handle = tokio::spawn(async move {
            monitor.run().await;
        });

        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(run_server_with_shutdown(
            self.bind_addr,
            state.clone(),
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %self.bind_addr,
            runtimes = ?self.registry.runtime_ids(),
            max_concurrent_executions = self.max_concurrent_executions,
            "EnvironmentRuntime started"
        );

        Ok(EnvironmentRuntime {
            server_handle,
            monitor_handle,
            server_shutdown_tx,
            monitor_shutdown,
            state,
            bind_addr: self.bind_addr,
        })
    }
}

/// A running closures environment that can be embedded in an application.
///
/// The runtime manages:
/// - HTTP server for descriptions, closures and executions
/// - Timeout monitor for cancelling overdue closures
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EnvironmentRuntime {
    server_handle: JoinHandle<Result<()>>,
    monitor_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    monitor_shutdown: Arc<Notify>,
    state: Arc<AppState>,
    bind_addr: SocketAddr,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// Get the bind address of the HTTP server.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the HTTP server and the timeout monitor to stop, then waits for
    /// both. Executions already running keep going until their own deadline.
    pub async fn shutdown(self) -> Result<()> {
        info!("EnvironmentRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);
        self.monitor_shutdown.notify_one();

        if let Err(e) = self.monitor_handle.await {
            error!("Timeout monitor task panicked: {}", e);
        }

        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("EnvironmentRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("EnvironmentRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("EnvironmentRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.monitor_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_store_and_registry() {
        let err = EnvironmentRuntime::builder().build().err().unwrap();
        assert!(err.to_string().contains("store"));

        let err = EnvironmentRuntime::builder()
            .store(ClosureStore::in_memory())
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("registry"));
    }

    #[test]
    fn test_build_rejects_zero_concurrency() {
        let result = EnvironmentRuntime::builder()
            .store(ClosureStore::in_memory())
            .registry(Arc::new(DriverRegistry::new()))
            .max_concurrent_executions(0)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let runtime = EnvironmentRuntime::builder()
            .store(ClosureStore::in_memory())
            .registry(Arc::new(DriverRegistry::new()))
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(runtime.is_running());
        runtime.shutdown().await.unwrap();
    }
}
