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

//! The lock record exchanged with the backend.

use chrono::Utc;

/// Status of a remote lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Record created but not yet driving a mutation
    Initial,
    /// Record participates in an acquisition or a held lease
    Processing,
}

impl LockStatus {
    /// Numeric code stored by relational backends.
    pub fn code(self) -> i32 {
        match self {
            LockStatus::Initial => 0,
            LockStatus::Processing => 1,
        }
    }

    /// Inverse of [`code`](Self::code); unknown codes map to `Initial`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => LockStatus::Processing,
            _ => LockStatus::Initial,
        }
    }
}

/// One remote lock record: holder identity, status, acquisition time.
///
/// A fresh entity is built for every backend call; nothing from it is cached
/// between calls. `lock_time` carries epoch milliseconds of the last
/// (re)acquisition or renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntity {
    /// Identity of the holding (or attempting) execution unit
    pub locker: String,
    /// Record status
    pub status: LockStatus,
    /// Epoch millis of the last (re)acquisition
    pub lock_time: i64,
}

impl LockEntity {
    /// Build a record asserting `locker` with the current timestamp.
    ///
    /// Used for acquisition and lease-extension calls.
    pub fn processing(locker: impl Into<String>) -> Self {
        Self {
            locker: locker.into(),
            status: LockStatus::Processing,
            lock_time: Utc::now().timestamp_millis(),
        }
    }

    /// Build a record asserting `locker` for a release call.
    pub fn initial(locker: impl Into<String>) -> Self {
        Self {
            locker: locker.into(),
            status: LockStatus::Initial,
            lock_time: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_entity() {
        let before = Utc::now().timestamp_millis();
        let entity = LockEntity::processing("10.0.0.1-77-task-3");
        assert_eq!(entity.locker, "10.0.0.1-77-task-3");
        assert_eq!(entity.status, LockStatus::Processing);
        assert!(entity.lock_time >= before);
    }

    #[test]
    fn test_initial_entity() {
        let entity = LockEntity::initial("10.0.0.1-77-task-3");
        assert_eq!(entity.status, LockStatus::Initial);
    }

    #[test]
    fn test_status_codes_round_trip() {
        assert_eq!(LockStatus::from_code(LockStatus::Initial.code()), LockStatus::Initial);
        assert_eq!(LockStatus::from_code(LockStatus::Processing.code()), LockStatus::Processing);
        assert_eq!(LockStatus::from_code(99), LockStatus::Initial);
    }
}
