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

//! Redis-backed lock processor.
//!
//! ## Purpose
//! The reference backend: realizes the whole conditional-mutation contract
//! with Redis primitives. Acquisition is a single `SET key locker NX PX
//! lease`, set-if-absent with a native expiry, so a crashed holder's record
//! disappears on its own. Extend and release are short Lua scripts (read
//! current holder, compare, `PEXPIRE`/`DEL`), executed server-side as one
//! indivisible unit to avoid a read-then-write race.
//!
//! ## Design Decisions
//! - **Why ConnectionManager**: automatic reconnection and cheap per-call
//!   clones, same as any other async Redis user in this codebase
//! - **Why Lua over WATCH/MULTI**: the compare-and-act pair must not fail
//!   spuriously under unrelated key traffic, and a two-line script is the
//!   cheapest indivisible unit Redis offers
//! - The stored value is just the locker string; acquisition time is not
//!   recoverable from the record

use crate::entity::{LockEntity, LockStatus};
use crate::error::{ProcessError, ProcessResult};
use crate::processor::{LockAttempt, LockProcessor};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;
use tracing::instrument;

const EXTEND_SCRIPT: &str = r#"if (redis.call('get', KEYS[1]) == ARGV[1]) then return redis.call('pexpire', KEYS[1], ARGV[2]); else return nil; end;"#;
const RELEASE_SCRIPT: &str = r#"if (redis.call('get', KEYS[1]) == ARGV[1]) then return redis.call('del', KEYS[1]); else return nil; end;"#;

/// Lock processor over a Redis instance.
///
/// ## Usage
/// ```rust,no_run
/// # use dlock::RedisLockProcessor;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let processor = RedisLockProcessor::new("redis://127.0.0.1:6379").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisLockProcessor {
    manager: ConnectionManager,
    extend_script: Script,
    release_script: Script,
}

impl RedisLockProcessor {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    #[instrument(skip(url))]
    pub async fn new(url: &str) -> ProcessResult<Self> {
        let client = Client::open(url)
            .map_err(|e| ProcessError::Backend(format!("Redis client for {url} failed: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| ProcessError::Backend(format!("Redis connect to {url} failed: {e}")))?;

        Ok(Self {
            manager,
            extend_script: Script::new(EXTEND_SCRIPT),
            release_script: Script::new(RELEASE_SCRIPT),
        })
    }
}

#[async_trait]
impl LockProcessor for RedisLockProcessor {
    #[instrument(skip(self, entity, lease), fields(lock_key = %key, locker = %entity.locker))]
    async fn acquire(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let mut conn = self.manager.clone();
        let lease_millis = (lease.as_millis() as u64).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&entity.locker)
            .arg("NX")
            .arg("PX")
            .arg(lease_millis)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProcessError::Backend(format!("Redis SET NX failed: {}", e)))?;

        if matches!(reply.as_deref(), Some("OK")) {
            Ok(LockAttempt::Applied)
        } else {
            Ok(LockAttempt::Conflict)
        }
    }

    #[instrument(skip(self, entity, lease), fields(lock_key = %key, locker = %entity.locker))]
    async fn extend(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let mut conn = self.manager.clone();
        let lease_millis = (lease.as_millis() as u64).max(1);

        let reply: Option<i64> = self
            .extend_script
            .key(key)
            .arg(&entity.locker)
            .arg(lease_millis)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ProcessError::Backend(format!("Redis PEXPIRE script failed: {}", e)))?;

        match reply {
            Some(_) => Ok(LockAttempt::Applied),
            None => Ok(LockAttempt::Conflict),
        }
    }

    #[instrument(skip(self, entity), fields(lock_key = %key, locker = %entity.locker))]
    async fn release(&self, key: &str, entity: &LockEntity) -> ProcessResult<LockAttempt> {
        let mut conn = self.manager.clone();

        let reply: Option<i64> = self
            .release_script
            .key(key)
            .arg(&entity.locker)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| ProcessError::Backend(format!("Redis DEL script failed: {}", e)))?;

        match reply {
            Some(_) => Ok(LockAttempt::Applied),
            None => Ok(LockAttempt::Conflict),
        }
    }

    #[instrument(skip(self), fields(lock_key = %key))]
    async fn load(&self, key: &str) -> ProcessResult<Option<LockEntity>> {
        let mut conn = self.manager.clone();

        let locker: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| ProcessError::Backend(format!("Redis GET failed: {}", e)))?;

        Ok(locker.map(|locker| LockEntity {
            locker,
            status: LockStatus::Processing,
            lock_time: 0,
        }))
    }
}
