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

//! # DLock: Distributed Reentrant Lock
//!
//! ## Purpose
//! A mutual-exclusion lock whose true ownership is recorded in a shared
//! remote store, for fleets of processes that must agree on a single holder
//! per named resource. In-process contention is resolved locally before any
//! remote call: all local contenders for one lock park in a lock-free wait
//! queue, and only the front waiter races the backend for the record.
//!
//! ## Design Decisions
//! - **Remote record as the single source of truth**: local owner and hold
//!   count are just this process's cache of "we hold it"
//! - **Lease-based self-healing**: every record carries a store-level expiry;
//!   a crashed holder's lock frees itself without any janitor process
//! - **Background renewal**: a held lock is extended at `0.75 × lease`, so
//!   callers never issue heartbeats themselves
//! - **Unfair local queue**: the wake policy targets only the head-successor,
//!   but a fresh caller may still beat it to the backend; throughput is
//!   favored over strict FIFO order
//! - **Contention is a value, not an error**: conditional backend mutations
//!   report [`LockAttempt::Conflict`], keeping error types for transport
//!   trouble only
//!
//! ## Backend Support
//! - **InMemory**: shared-map store (feature `memory-backend`, default; for
//!   tests and single-process use)
//! - **Redis**: `SET NX PX` acquisition plus Lua compare-and-act scripts,
//!   native TTL (feature `redis-backend`)
//! - **SQLite**: conditional single-statement mutations with lazily-enforced
//!   expiry (feature `sqlite-backend`)
//!
//! ## Examples
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use dlock::{DistributedReentrantLock, LockConfig, MemoryLockProcessor};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = LockConfig::new("USER_LOCK", "2356784", Duration::from_millis(500));
//! let lock = DistributedReentrantLock::new(config, Arc::new(MemoryLockProcessor::new()));
//!
//! // First acquisition hits the backend; the nested one is purely local
//! lock.acquire().await;
//! lock.acquire().await;
//!
//! lock.release().await.unwrap();
//! lock.release().await.unwrap();
//! # }
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod generator;
mod ident;
pub mod lock;
pub mod processor;
mod queue;
mod tasks;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

#[cfg(feature = "sqlite-backend")]
pub mod sql;

pub use config::LockConfig;
pub use entity::{LockEntity, LockStatus};
pub use error::{LockError, LockResult, ProcessError, ProcessResult};
pub use generator::{LeaseConfigError, LeaseTable, LockGenerator};
pub use lock::DistributedReentrantLock;
#[cfg(any(test, feature = "test-util"))]
pub use lock::LockStateSnapshot;
pub use processor::{LockAttempt, LockProcessor};

#[cfg(feature = "memory-backend")]
pub use memory::MemoryLockProcessor;

#[cfg(feature = "redis-backend")]
pub use redis::RedisLockProcessor;

#[cfg(feature = "sqlite-backend")]
pub use sql::SqliteLockProcessor;
