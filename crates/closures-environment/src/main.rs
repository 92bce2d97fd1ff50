// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Closures Environment - Closure Execution Server
//!
//! An HTTP server responsible for:
//! - Closure descriptions (create, get)
//! - Closures (create, get, execute, report outcome)
//! - Timeout enforcement for running closures

use std::sync::Arc;
use tracing::{info, warn};

use closures_core::ClosureStore;
use closures_core::persistence::SqlitePersistence;
use closures_environment::config::Config;
use closures_environment::driver::{JsDriver, ProcessDriver, ProcessLanguage};
use closures_environment::registry::DriverRegistry;
use closures_environment::runtime::EnvironmentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "closures_environment=info,closures_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        database = ?config.database_path,
        "Starting Closures Environment"
    );

    let store = match &config.database_path {
        Some(path) => {
            let persistence = SqlitePersistence::from_path(path).await?;
            info!(path = %path.display(), "Connected to database");
            ClosureStore::new(Arc::new(persistence))
        }
        None => {
            warn!("CLOSURES_DATABASE_PATH not set, closures are kept in memory");
            ClosureStore::in_memory()
        }
    };

    let js = Arc::new(JsDriver::new());
    let registry = DriverRegistry::new()
        .with_driver("js", js.clone())
        .with_driver("nodejs-embedded", js)
        .with_driver(
            "nodejs",
            Arc::new(ProcessDriver::new(ProcessLanguage::NodeJs, config.node_binary.clone())),
        )
        .with_driver(
            "python",
            Arc::new(ProcessDriver::new(ProcessLanguage::Python, config.python_binary.clone())),
        );

    let runtime = EnvironmentRuntime::builder()
        .store(store)
        .registry(Arc::new(registry))
        .bind_addr(config.http_addr)
        .max_concurrent_executions(config.max_concurrent_executions)
        .sweep_interval(config.sweep_interval)
        .timeout_grace(config.timeout_grace)
        .build()?
        .start()
        .await?;

    info!(addr = %config.http_addr, "Closures server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Closures Environment shut down");

    Ok(())
}
