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

//! Error types for distributed lock operations.

use thiserror::Error;

/// Result type for lock API calls.
pub type LockResult<T> = Result<T, LockError>;

/// Errors surfaced by the lock API itself.
///
/// Backend-level failures never reach callers through this type: a failed
/// acquisition attempt shows up as `try_acquire() == false` (or as a blocking
/// `acquire()` that keeps waiting), and release swallows backend errors
/// because the lease makes the remote record self-expire anyway.
#[derive(Error, Debug)]
pub enum LockError {
    /// Release attempted by a task that does not hold the lock
    #[error("lock is not held by the calling task")]
    NotLockHolder,

    /// Operation is not part of the supported surface
    #[error("operation not supported: {0}")]
    Unsupported(String),
}

/// Result type for backend processor operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Transport-level backend failures.
///
/// Expected contention is *not* an error: conditional mutations report it as
/// [`LockAttempt::Conflict`](crate::processor::LockAttempt) instead. This type
/// covers only the cases where the backend could not be reached or answered
/// with a driver-level failure.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Backend error (network, database, etc.)
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for ProcessError {
    fn from(err: redis::RedisError) -> Self {
        ProcessError::Backend(format!("Redis error: {}", err))
    }
}

#[cfg(feature = "sqlite-backend")]
impl From<sqlx::Error> for ProcessError {
    fn from(err: sqlx::Error) -> Self {
        ProcessError::Backend(format!("SQL error: {}", err))
    }
}
