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

//! Backend processor contract for the remote lock record.

use crate::entity::LockEntity;
use crate::error::ProcessResult;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a conditional backend mutation.
///
/// Contention is an expected, frequent result of these operations, so it is a
/// plain value rather than an error. Transport failures are the error channel
/// ([`ProcessError`](crate::error::ProcessError)).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAttempt {
    /// The conditional mutation took effect
    Applied,
    /// The record's state did not match the precondition (held by another,
    /// already gone, or already present)
    Conflict,
}

impl LockAttempt {
    /// True when the mutation took effect.
    pub fn applied(self) -> bool {
        matches!(self, LockAttempt::Applied)
    }
}

/// Atomic operations against the shared remote lock record.
///
/// ## Purpose
/// Abstracts the remote store behind the four conditional primitives the lock
/// algorithm needs. Every operation must be race-free against concurrent
/// callers targeting the same unique key; the store, not this process, is the
/// final arbiter of ownership.
///
/// ## Contract
/// - `acquire`: set the record only if no live record exists, with a
///   store-level expiry of `lease` so a crashed holder self-heals
/// - `extend`: refresh the expiry only if the current holder matches
/// - `release`: delete the record only if the current holder matches
/// - `load` / `is_free`: non-mutating inspection
///
/// Conditional mutations report [`LockAttempt::Conflict`] when the
/// precondition fails; only transport-level trouble is an `Err`.
#[async_trait]
pub trait LockProcessor: Send + Sync {
    /// Install `entity` under `key` if no live record exists.
    ///
    /// The stored record must expire on its own after `lease` with no further
    /// action from this process.
    async fn acquire(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt>;

    /// Refresh the expiry of `key` to `lease` from now, provided the record
    /// is still held by `entity.locker`.
    async fn extend(&self, key: &str, entity: &LockEntity, lease: Duration) -> ProcessResult<LockAttempt>;

    /// Delete the record under `key`, provided it is still held by
    /// `entity.locker`. `Conflict` here usually just means the lease already
    /// expired; callers treat it as non-fatal.
    async fn release(&self, key: &str, entity: &LockEntity) -> ProcessResult<LockAttempt>;

    /// Fetch the live record under `key`, if any.
    async fn load(&self, key: &str) -> ProcessResult<Option<LockEntity>>;

    /// True when no live record exists under `key`.
    async fn is_free(&self, key: &str) -> ProcessResult<bool> {
        Ok(self.load(key).await?.is_none())
    }
}
