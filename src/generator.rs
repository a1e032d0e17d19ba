// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 The DLock Authors
//
// This file is part of DLock.
//
// DLock is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// DLock is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with DLock. If not, see <https://www.gnu.org/licenses/>.

//! Lease configuration and lock factory.
//!
//! ## Purpose
//! Business code names locks by type and target; the lease for each type is
//! deployment configuration, not code. `LeaseTable` holds the mapping from
//! lock-type name to lease milliseconds, loaded once at startup from YAML,
//! and `LockGenerator` combines the table with a shared backend processor to
//! mint ready lock instances.

use crate::config::LockConfig;
use crate::lock::DistributedReentrantLock;
use crate::processor::LockProcessor;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lease-configuration errors.
#[derive(Debug, Error)]
pub enum LeaseConfigError {
    /// File I/O error
    #[error("Failed to read lease config '{path}': {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },
    /// YAML parsing error
    #[error("Failed to parse lease config: {0}")]
    YamlError(#[from] serde_yaml::Error),
    /// Lock type missing from the table
    #[error("No lease configured for lock type '{0}'")]
    UnknownLockType(String),
}

/// Mapping from lock-type name to lease duration in milliseconds.
///
/// YAML shape:
/// ```yaml
/// lock_types:
///   USER_LOCK: 500
///   ORDER_LOCK: 1000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseTable {
    lock_types: HashMap<String, u64>,
}

impl LeaseTable {
    /// Build a table from an in-memory mapping.
    pub fn new(lock_types: HashMap<String, u64>) -> Self {
        Self { lock_types }
    }

    /// Load the table from a YAML file.
    pub async fn from_yaml_file(path: &str) -> Result<Self, LeaseConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LeaseConfigError::IoError {
                path: path.to_string(),
                source: e,
            })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Lease for `lock_type`, if configured.
    pub fn lease_millis(&self, lock_type: &str) -> Option<u64> {
        self.lock_types.get(lock_type).copied()
    }
}

/// Factory wiring a lock type and target to a configured lock instance.
///
/// Every lock minted by one generator shares the same backend processor, so
/// locks for different keys reuse the same connections.
#[derive(Clone)]
pub struct LockGenerator {
    processor: Arc<dyn LockProcessor>,
    leases: LeaseTable,
}

impl LockGenerator {
    /// Build a generator over `processor` and an already-loaded table.
    pub fn new(processor: Arc<dyn LockProcessor>, leases: LeaseTable) -> Self {
        Self { processor, leases }
    }

    /// Load the lease table from `path` and build a generator over it.
    pub async fn from_yaml_file(
        processor: Arc<dyn LockProcessor>,
        path: &str,
    ) -> Result<Self, LeaseConfigError> {
        let leases = LeaseTable::from_yaml_file(path).await?;
        Ok(Self::new(processor, leases))
    }

    /// Lock for `lock_type` with an empty target: one singleton lock per type.
    pub fn generate(&self, lock_type: &str) -> Result<DistributedReentrantLock, LeaseConfigError> {
        self.generate_for_target(lock_type, "")
    }

    /// Lock for the `(lock_type, lock_target)` pair, lease from the table.
    pub fn generate_for_target(
        &self,
        lock_type: &str,
        lock_target: &str,
    ) -> Result<DistributedReentrantLock, LeaseConfigError> {
        let millis = self
            .leases
            .lease_millis(lock_type)
            .ok_or_else(|| LeaseConfigError::UnknownLockType(lock_type.to_string()))?;
        Ok(self.generate_with_lease(lock_type, lock_target, Duration::from_millis(millis)))
    }

    /// Lock with an explicit lease, bypassing the table.
    pub fn generate_with_lease(
        &self,
        lock_type: &str,
        lock_target: &str,
        lease: Duration,
    ) -> DistributedReentrantLock {
        let config = LockConfig::new(lock_type, lock_target, lease);
        DistributedReentrantLock::new(config, self.processor.clone())
    }
}
