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

//! SQLite-backed lock processor.
//!
//! ## Purpose
//! Realizes the conditional-mutation contract on a relational table. SQLite
//! has no native TTL, so expiry is enforced lazily: every condition compares
//! `expires_at` against now, and an expired row counts as absent. Each
//! operation is a single conditional statement, so statement-level atomicity
//! stands in for the server-side scripts of the Redis backend.
//!
//! PostgreSQL or MySQL can follow the same pattern with their pool types.

use crate::entity::{LockEntity, LockStatus};
use crate::error::{ProcessError, ProcessResult};
use crate::processor::{LockAttempt, LockProcessor};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::instrument;

/// Lock processor over a SQLite database.
///
/// Uses a single `dlock` table:
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS dlock (
///   lock_key   TEXT PRIMARY KEY,
///   locker     TEXT NOT NULL,
///   status     INTEGER NOT NULL,
///   lock_time  INTEGER NOT NULL,
///   expires_at INTEGER NOT NULL
/// );
/// ```
///
/// `lock_time` and `expires_at` are UNIX epoch milliseconds.
#[derive(Clone)]
pub struct SqliteLockProcessor {
    pool: SqlitePool,
}

impl SqliteLockProcessor {
    /// Create a SQLite lock processor.
    ///
    /// `database_url` is any valid `sqlx` SQLite URL, e.g.:
    /// - `sqlite::memory:` (in-memory)
    /// - `sqlite://dlock.db`
    #[instrument(skip(database_url))]
    pub async fn new(database_url: &str) -> ProcessResult<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| ProcessError::Backend(format!("failed to connect SQLite: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dlock (
              lock_key   TEXT PRIMARY KEY,
              locker     TEXT NOT NULL,
              status     INTEGER NOT NULL,
              lock_time  INTEGER NOT NULL,
              expires_at INTEGER NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| ProcessError::Backend(format!("failed to create dlock table: {e}")))?;

        Ok(Self { pool })
    }

    fn now_epoch_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl LockProcessor for SqliteLockProcessor {
    #[instrument(skip(self, entity, lease), fields(lock_key = %key, locker = %entity.locker))]
    async fn acquire(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let now = Self::now_epoch_millis();
        let expires_at = now + lease.as_millis() as i64;

        // Insert if absent, take over if the existing row has expired, leave
        // a live row alone
        let result = sqlx::query(
            r#"INSERT INTO dlock (lock_key, locker, status, lock_time, expires_at)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(lock_key) DO UPDATE SET
                 locker = excluded.locker,
                 status = excluded.status,
                 lock_time = excluded.lock_time,
                 expires_at = excluded.expires_at
               WHERE dlock.expires_at <= ?6"#,
        )
        .bind(key)
        .bind(&entity.locker)
        .bind(entity.status.code())
        .bind(entity.lock_time)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ProcessError::Backend(format!("insert lock: {e}")))?;

        if result.rows_affected() == 1 {
            Ok(LockAttempt::Applied)
        } else {
            Ok(LockAttempt::Conflict)
        }
    }

    #[instrument(skip(self, entity, lease), fields(lock_key = %key, locker = %entity.locker))]
    async fn extend(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt> {
        let now = Self::now_epoch_millis();
        let expires_at = now + lease.as_millis() as i64;

        let result = sqlx::query(
            r#"UPDATE dlock
               SET lock_time = ?3, expires_at = ?4
               WHERE lock_key = ?1 AND locker = ?2 AND expires_at > ?5"#,
        )
        .bind(key)
        .bind(&entity.locker)
        .bind(entity.lock_time)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ProcessError::Backend(format!("extend lock: {e}")))?;

        if result.rows_affected() == 1 {
            Ok(LockAttempt::Applied)
        } else {
            Ok(LockAttempt::Conflict)
        }
    }

    #[instrument(skip(self, entity), fields(lock_key = %key, locker = %entity.locker))]
    async fn release(&self, key: &str, entity: &LockEntity) -> ProcessResult<LockAttempt> {
        let now = Self::now_epoch_millis();

        let result = sqlx::query(
            r#"DELETE FROM dlock
               WHERE lock_key = ?1 AND locker = ?2 AND expires_at > ?3"#,
        )
        .bind(key)
        .bind(&entity.locker)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| ProcessError::Backend(format!("delete lock: {e}")))?;

        if result.rows_affected() == 1 {
            Ok(LockAttempt::Applied)
        } else {
            Ok(LockAttempt::Conflict)
        }
    }

    #[instrument(skip(self), fields(lock_key = %key))]
    async fn load(&self, key: &str) -> ProcessResult<Option<LockEntity>> {
        let now = Self::now_epoch_millis();

        let row = sqlx::query(
            r#"SELECT locker, status, lock_time
               FROM dlock WHERE lock_key = ?1 AND expires_at > ?2"#,
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ProcessError::Backend(format!("select lock: {e}")))?;

        Ok(row.map(|row| {
            let locker: String = row.get("locker");
            let status: i64 = row.get("status");
            let lock_time: i64 = row.get("lock_time");
            LockEntity {
                locker,
                status: LockStatus::from_code(status as i32),
                lock_time,
            }
        }))
    }
}
