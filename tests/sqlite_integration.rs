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

//! Integration tests for the SQLite lock backend.
//!
//! These tests verify:
//! - Acquire-if-absent and conflict on a live record
//! - Extend and release honored only for the recorded locker
//! - Lazy expiry: expired rows read as absent and can be taken over
//! - The lock facade working end to end over SQLite
//!
//! All tests run against `sqlite::memory:` and issue queries one at a
//! time, so the pool keeps reusing a single connection and every query
//! sees the same in-memory database.

#[cfg(feature = "sqlite-backend")]
mod tests {
    use dlock::{
        DistributedReentrantLock, LockAttempt, LockConfig, LockEntity, LockProcessor, LockStatus,
        SqliteLockProcessor,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    async fn create_processor() -> SqliteLockProcessor {
        SqliteLockProcessor::new("sqlite::memory:")
            .await
            .expect("in-memory SQLite should connect")
    }

    #[tokio::test]
    async fn test_sqlite_acquire_and_conflict() {
        let processor = create_processor().await;
        let lease = Duration::from_secs(30);

        let first = LockEntity::processing("host-1-task-1");
        let attempt = processor.acquire("DLOCK_SQL_acq", &first, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Applied);

        let stored = processor.load("DLOCK_SQL_acq").await.unwrap().unwrap();
        assert_eq!(stored.locker, "host-1-task-1");
        assert_eq!(stored.status, LockStatus::Processing);
        assert!(stored.lock_time > 0);

        // A live record rejects everyone, the current holder included
        let rival = LockEntity::processing("host-2-task-1");
        let attempt = processor.acquire("DLOCK_SQL_acq", &rival, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);
        let attempt = processor.acquire("DLOCK_SQL_acq", &first, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);

        // The conflicting attempts left the record alone
        let stored = processor.load("DLOCK_SQL_acq").await.unwrap().unwrap();
        assert_eq!(stored.locker, "host-1-task-1");
    }

    #[tokio::test]
    async fn test_sqlite_extend_only_for_holder() {
        let processor = create_processor().await;
        let lease = Duration::from_secs(30);

        let owner = LockEntity::processing("host-1-task-7");
        processor.acquire("DLOCK_SQL_ext", &owner, lease).await.unwrap();

        let attempt = processor.extend("DLOCK_SQL_ext", &owner, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Applied);

        let stranger = LockEntity::processing("host-9-task-9");
        let attempt = processor.extend("DLOCK_SQL_ext", &stranger, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);

        let attempt = processor.extend("DLOCK_SQL_missing", &owner, lease).await.unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);
    }

    #[tokio::test]
    async fn test_sqlite_release_only_for_holder() {
        let processor = create_processor().await;
        let lease = Duration::from_secs(30);

        let owner = LockEntity::processing("host-1-task-3");
        processor.acquire("DLOCK_SQL_rel", &owner, lease).await.unwrap();

        let stranger = LockEntity::initial("host-9-task-9");
        let attempt = processor.release("DLOCK_SQL_rel", &stranger).await.unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);
        assert!(processor.load("DLOCK_SQL_rel").await.unwrap().is_some());

        let attempt = processor
            .release("DLOCK_SQL_rel", &LockEntity::initial("host-1-task-3"))
            .await
            .unwrap();
        assert_eq!(attempt, LockAttempt::Applied);
        assert!(processor.load("DLOCK_SQL_rel").await.unwrap().is_none());

        // Releasing a gone record reports the conflict
        let attempt = processor
            .release("DLOCK_SQL_rel", &LockEntity::initial("host-1-task-3"))
            .await
            .unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);
    }

    #[tokio::test]
    async fn test_sqlite_expired_lock_takeover() {
        let processor = create_processor().await;
        let lease = Duration::from_millis(50);

        let dead = LockEntity::processing("deadhost-1-task-1");
        processor.acquire("DLOCK_SQL_ttl", &dead, lease).await.unwrap();

        sleep(Duration::from_millis(80)).await;

        // The expired row reads as absent
        assert!(processor.load("DLOCK_SQL_ttl").await.unwrap().is_none());
        assert!(processor.is_free("DLOCK_SQL_ttl").await.unwrap());

        // A new locker takes the key over in place
        let next = LockEntity::processing("host-2-task-2");
        let attempt = processor
            .acquire("DLOCK_SQL_ttl", &next, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(attempt, LockAttempt::Applied);
        let stored = processor.load("DLOCK_SQL_ttl").await.unwrap().unwrap();
        assert_eq!(stored.locker, "host-2-task-2");

        // The previous holder cannot extend its way back in
        let attempt = processor
            .extend("DLOCK_SQL_ttl", &dead, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(attempt, LockAttempt::Conflict);
    }

    #[tokio::test]
    async fn test_sqlite_is_free_lifecycle() {
        let processor = create_processor().await;
        let lease = Duration::from_secs(30);

        assert!(processor.is_free("DLOCK_SQL_free").await.unwrap());

        let owner = LockEntity::processing("host-1-task-5");
        processor.acquire("DLOCK_SQL_free", &owner, lease).await.unwrap();
        assert!(!processor.is_free("DLOCK_SQL_free").await.unwrap());

        processor
            .release("DLOCK_SQL_free", &LockEntity::initial("host-1-task-5"))
            .await
            .unwrap();
        assert!(processor.is_free("DLOCK_SQL_free").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_facade_round_trip() {
        let processor = Arc::new(create_processor().await);
        // A long lease keeps the renewal task idle for the test's lifetime
        let config = LockConfig::new("ORDER_LOCK", "sqlite-rt", Duration::from_secs(30));
        let lock = DistributedReentrantLock::new(config, processor.clone());

        lock.acquire().await;
        lock.acquire().await;

        let stored = processor.load("DLOCK_ORDER_LOCK_sqlite-rt").await.unwrap().unwrap();
        assert_eq!(stored.status, LockStatus::Processing);

        lock.release().await.unwrap();
        assert!(!processor.is_free("DLOCK_ORDER_LOCK_sqlite-rt").await.unwrap());

        lock.release().await.unwrap();
        assert!(processor.is_free("DLOCK_ORDER_LOCK_sqlite-rt").await.unwrap());
    }
}
