// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Driver registry: runtime id -> driver.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::driver::Driver;
use crate::error::{Error, Result};

/// Maps runtime identifiers to drivers.
///
/// Registration is expected once at start-up; re-registering an id replaces
/// the previous driver. Lookups of unknown ids fail with
/// [`Error::UnsupportedRuntime`].
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("runtime_ids", &self.runtime_ids())
            .finish()
    }
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `runtime_id` with `driver`. Last write wins.
    pub fn register(&self, runtime_id: impl Into<String>, driver: Arc<dyn Driver>) {
        let runtime_id = runtime_id.into();
        let driver_type = driver.driver_type();
        let mut drivers = self.drivers.write().unwrap_or_else(|e| e.into_inner());
        if drivers.insert(runtime_id.clone(), driver).is_some() {
            warn!(runtime_id = %runtime_id, driver_type, "Driver re-registered, replacing previous");
        } else {
            info!(runtime_id = %runtime_id, driver_type, "Driver registered");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_driver(self, runtime_id: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        self.register(runtime_id, driver);
        self
    }

    /// Look up the driver for `runtime_id`.
    pub fn resolve(&self, runtime_id: &str) -> Result<Arc<dyn Driver>> {
        self.drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(runtime_id)
            .cloned()
            .ok_or_else(|| Error::UnsupportedRuntime(runtime_id.to_string()))
    }

    /// Registered runtime ids, sorted.
    pub fn runtime_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
