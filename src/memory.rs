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

//! In-memory lock processor (for testing).

use crate::entity::{LockEntity, LockStatus};
use crate::error::ProcessResult;
use crate::processor::{LockAttempt, LockProcessor};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredLock {
    locker: String,
    status: LockStatus,
    lock_time: i64,
    expires_at: i64,
}

impl StoredLock {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at > now
    }
}

/// In-memory lock processor (for testing).
///
/// ## Purpose
/// Provides a hermetic implementation of [`LockProcessor`] for tests and
/// single-process scenarios. Cloning shares the underlying store, which is how
/// tests simulate several processes contending over one backend.
///
/// ## Limitations
/// - Not persistent (locks lost on restart)
/// - Not distributed (single process only)
/// - No TTL cleanup (expired locks remain until accessed)
#[derive(Clone)]
pub struct MemoryLockProcessor {
    locks: Arc<RwLock<HashMap<String, StoredLock>>>,
}

impl MemoryLockProcessor {
    /// Create a new in-memory lock processor.
    pub fn new() -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryLockProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockProcessor for MemoryLockProcessor {
    async fn acquire(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let mut locks = self.locks.write().await;
        let now = Utc::now().timestamp_millis();

        if let Some(existing) = locks.get(key) {
            if existing.is_live(now) {
                return Ok(LockAttempt::Conflict);
            }
            // Expired entry, treat as absent
        }

        locks.insert(
            key.to_string(),
            StoredLock {
                locker: entity.locker.clone(),
                status: entity.status,
                lock_time: entity.lock_time,
                expires_at: now + lease.as_millis() as i64,
            },
        );
        Ok(LockAttempt::Applied)
    }

    async fn extend(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let mut locks = self.locks.write().await;
        let now = Utc::now().timestamp_millis();

        match locks.get_mut(key) {
            Some(existing) if existing.is_live(now) && existing.locker == entity.locker => {
                existing.lock_time = entity.lock_time;
                existing.expires_at = now + lease.as_millis() as i64;
                Ok(LockAttempt::Applied)
            }
            _ => Ok(LockAttempt::Conflict),
        }
    }

    async fn release(&self, key: &str, entity: &LockEntity) -> ProcessResult<LockAttempt> {
        let mut locks = self.locks.write().await;
        let now = Utc::now().timestamp_millis();

        match locks.get(key) {
            Some(existing) if existing.is_live(now) && existing.locker == entity.locker => {
                locks.remove(key);
                Ok(LockAttempt::Applied)
            }
            _ => Ok(LockAttempt::Conflict),
        }
    }

    async fn load(&self, key: &str) -> ProcessResult<Option<LockEntity>> {
        let locks = self.locks.read().await;
        let now = Utc::now().timestamp_millis();

        Ok(locks.get(key).filter(|stored| stored.is_live(now)).map(|stored| LockEntity {
            locker: stored.locker.clone(),
            status: stored.status,
            lock_time: stored.lock_time,
        }))
    }
}
