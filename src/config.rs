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

//! Lock configuration: identity (type + target) and lease duration.

use std::time::Duration;

/// Prefix for unique key generation.
pub const UK_PRE: &str = "DLOCK";

/// Separator for unique key generation.
pub const UK_SP: &str = "_";

/// Immutable configuration for one named lock.
///
/// The minimum granularity of a lock is its unique key, derived as
/// `DLOCK_<type>_<target>`. The lock type groups targets of the same business
/// scenario (say `USER_LOCK` or `ORDER_LOCK`); the target names the concrete
/// instance (a user id, an order id). The derived key must stay byte-stable:
/// it identifies the remote record, and every process in the fleet has to
/// compute the same key for the same lock.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use dlock::LockConfig;
///
/// let config = LockConfig::new("USER_LOCK", "2356784", Duration::from_millis(500));
/// assert_eq!(config.unique_key(), "DLOCK_USER_LOCK_2356784");
/// assert_eq!(config.lease_millis(), 500);
/// ```
#[derive(Debug, Clone)]
pub struct LockConfig {
    lock_type: String,
    lock_target: String,
    unique_key: String,
    lease: Duration,
}

impl LockConfig {
    /// Create a configuration from a lock type, target, and lease duration.
    ///
    /// The target may be empty for singleton locks; surrounding whitespace is
    /// trimmed so equivalent spellings map to the same remote record.
    pub fn new(lock_type: impl Into<String>, lock_target: impl Into<String>, lease: Duration) -> Self {
        let lock_type = lock_type.into();
        let lock_target = lock_target.into();
        let unique_key = format!("{}{}{}{}{}", UK_PRE, UK_SP, lock_type, UK_SP, lock_target.trim());
        Self {
            lock_type,
            lock_target,
            unique_key,
            lease,
        }
    }

    /// Lock type (business category).
    pub fn lock_type(&self) -> &str {
        &self.lock_type
    }

    /// Lock target (instance id within the type, may be empty).
    pub fn lock_target(&self) -> &str {
        &self.lock_target
    }

    /// Unique key identifying the remote record.
    pub fn unique_key(&self) -> &str {
        &self.unique_key
    }

    /// Lease duration.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Lease duration in milliseconds.
    pub fn lease_millis(&self) -> u64 {
        self.lease.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_key_format() {
        let config = LockConfig::new("USER_LOCK", "42", Duration::from_millis(500));
        assert_eq!(config.unique_key(), "DLOCK_USER_LOCK_42");
        assert_eq!(config.lock_type(), "USER_LOCK");
        assert_eq!(config.lock_target(), "42");
    }

    #[test]
    fn test_unique_key_trims_target() {
        let config = LockConfig::new("BATCH_LOCK", "  MAP_NODE  ", Duration::from_secs(1));
        assert_eq!(config.unique_key(), "DLOCK_BATCH_LOCK_MAP_NODE");
        // The raw target keeps its original spelling
        assert_eq!(config.lock_target(), "  MAP_NODE  ");
    }

    #[test]
    fn test_empty_target() {
        let config = LockConfig::new("SINGLETON_LOCK", "", Duration::from_millis(300));
        assert_eq!(config.unique_key(), "DLOCK_SINGLETON_LOCK_");
    }

    #[test]
    fn test_lease_millis() {
        let config = LockConfig::new("USER_LOCK", "42", Duration::from_secs(2));
        assert_eq!(config.lease_millis(), 2000);
    }
}
