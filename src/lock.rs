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

//! Distributed reentrant lock façade.
//!
//! ## Purpose
//! Composes the backend processor, the local wait queue, and the two
//! background tasks into the public lock API: `acquire`, `try_acquire`,
//! `release`. True ownership lives in the remote record; the local owner and
//! hold count are this process's cache of "we currently hold it", installed
//! only by a successful backend acquisition and cleared only by release.
//!
//! ## Design
//! - Acquisition fast path: reentrant increment, else one conditional insert
//!   against the backend
//! - On contention the caller parks in the queue; it is woken by a local
//!   release or by the retry poll, re-checks that it is the front waiter, and
//!   races the backend again
//! - A held lock is kept alive by the lease-renewal task at `0.75 × lease`;
//!   a remote-held lock is watched by the retry task at `lease / 6`
//! - Release runs the remote delete first; the local teardown (clear owner,
//!   stop renewal, wake the front waiter) sits in a drop guard, so a release
//!   future dropped mid-call still completes the local side

use crate::config::LockConfig;
use crate::entity::LockEntity;
use crate::error::{LockError, LockResult};
use crate::ident::{locker_for, ExecutionId};
use crate::processor::{LockAttempt, LockProcessor};
use crate::queue::{WaitNode, WaitQueue};
use crate::tasks::{TaskHandle, TaskSlot};
use arc_swap::ArcSwapOption;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, interval_at, sleep, Instant};
use tracing::{debug, warn};

/// Delay before the renewal task's first tick.
const RENEWAL_START_DELAY: Duration = Duration::from_millis(1);

/// Local owner of the remote record: the task identity used for reentrancy
/// checks, the locker string written into the record, and the reentrancy
/// depth. The count lives inside the owner cell so it exists exactly as long
/// as an owner does; a stale release can never touch a successor's count.
struct OwnerState {
    exec: ExecutionId,
    locker: String,
    hold_count: AtomicU32,
}

/// Read-only view of the façade's local state, for assertions in tests.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStateSnapshot {
    /// Reentrancy depth of the current owner, 0 when unheld
    pub hold_count: u32,
    /// Locker string of the local owner, if any
    pub owner_locker: Option<String>,
}

/// A mutual-exclusion lock whose ownership is recorded in a shared remote
/// store.
///
/// At most one execution unit across all participating processes holds the
/// lock at a time. The holder's record carries a lease: if the holding
/// process dies, the record expires on its own and the lock self-heals. A
/// held lock is renewed in the background, so callers never issue heartbeats
/// themselves.
///
/// Acquisition is reentrant per Tokio task (with a thread-id fallback outside
/// the runtime's task context): the task that holds the lock may acquire it
/// again without touching the backend, and must release once per acquisition.
///
/// Clones share all local state. Handing clones to several tasks makes them
/// contend through one local wait queue, so only one of them at a time races
/// the backend for the record.
///
/// ## Usage
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use dlock::{DistributedReentrantLock, LockConfig, MemoryLockProcessor};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = LockConfig::new("ORDER_LOCK", "order-2356784", Duration::from_millis(500));
/// let lock = DistributedReentrantLock::new(config, Arc::new(MemoryLockProcessor::new()));
///
/// lock.acquire().await;
/// // ... critical section ...
/// lock.release().await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct DistributedReentrantLock {
    core: Arc<LockCore>,
}

struct LockCore {
    config: LockConfig,
    processor: Arc<dyn LockProcessor>,
    owner: ArcSwapOption<OwnerState>,
    queue: WaitQueue,
    renewal_task: TaskSlot,
    retry_task: TaskSlot,
}

impl DistributedReentrantLock {
    /// Create a lock over `config`, backed by `processor`.
    pub fn new(config: LockConfig, processor: Arc<dyn LockProcessor>) -> Self {
        Self {
            core: Arc::new(LockCore {
                config,
                processor,
                owner: ArcSwapOption::new(None),
                queue: WaitQueue::new(),
                renewal_task: TaskSlot::new(),
                retry_task: TaskSlot::new(),
            }),
        }
    }

    /// The configuration this lock was built with.
    pub fn config(&self) -> &LockConfig {
        &self.core.config
    }

    /// Acquire the lock, waiting as long as it takes.
    ///
    /// Reentrant invocation by the current holder increments the hold count
    /// without a backend call. Otherwise the caller makes one remote attempt
    /// and, on contention, parks in the local wait queue until a local
    /// release or the retry poll wakes it for another attempt. Never fails;
    /// backend trouble just means more waiting.
    ///
    /// The returned future may be dropped mid-wait: the queue slot is
    /// abandoned and any wakeup it absorbed is passed on, so other waiters
    /// are not stranded. Dropping it during the remote call itself can leave
    /// an orphan record behind, which expires on its own after the lease.
    pub async fn acquire(&self) {
        if self.core.try_acquire_once().await {
            return;
        }
        self.core.acquire_queued().await;
    }

    /// Make one acquisition attempt without waiting.
    ///
    /// Returns `true` on success, including reentrant success. A backend
    /// transport failure counts as contention and comes back `false`.
    pub async fn try_acquire(&self) -> bool {
        self.core.try_acquire_once().await
    }

    /// Timed acquisition is not part of the supported surface.
    pub async fn try_acquire_for(&self, _timeout: Duration) -> LockResult<bool> {
        Err(LockError::Unsupported("timed acquisition".to_string()))
    }

    /// Release one hold on the lock.
    ///
    /// Fails with [`LockError::NotLockHolder`] when the calling task is not
    /// the current owner. Inner reentrant releases only decrement the hold
    /// count; the outermost release deletes the remote record (tolerating a
    /// record that already expired), clears the local owner, stops the
    /// renewal task, and wakes the front waiter.
    ///
    /// The outermost release is committed from its first poll: dropping the
    /// future mid-call still clears the local side and stops renewal, and a
    /// record the delete never reached expires on its own lease.
    pub async fn release(&self) -> LockResult<()> {
        self.core.release().await
    }

    /// Local façade state, for test assertions.
    #[cfg(any(test, feature = "test-util"))]
    pub fn state_snapshot(&self) -> LockStateSnapshot {
        let owner = self.core.owner.load_full();
        LockStateSnapshot {
            hold_count: owner
                .as_ref()
                .map_or(0, |o| o.hold_count.load(Ordering::SeqCst)),
            owner_locker: owner.map(|o| o.locker.clone()),
        }
    }
}

impl fmt::Debug for DistributedReentrantLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedReentrantLock")
            .field("config", &self.core.config)
            .finish_non_exhaustive()
    }
}

impl LockCore {
    /// One acquisition attempt: reentrant fast path, then a single
    /// conditional insert against the backend.
    async fn try_acquire_once(self: &Arc<Self>) -> bool {
        let exec = ExecutionId::current();
        if let Some(owner) = self.owner.load_full() {
            if owner.exec == exec {
                owner.hold_count.fetch_add(1, Ordering::SeqCst);
                return true;
            }
        }

        let entity = LockEntity::processing(locker_for(exec));
        match self
            .processor
            .acquire(self.config.unique_key(), &entity, self.config.lease())
            .await
        {
            Ok(LockAttempt::Applied) => {}
            Ok(LockAttempt::Conflict) => return false,
            Err(e) => {
                // Transport trouble counts as contention; the retry poll or
                // a later caller attempts again
                debug!("Acquire attempt for {} failed: {}", self.config.unique_key(), e);
                return false;
            }
        }

        self.owner.store(Some(Arc::new(OwnerState {
            exec,
            locker: entity.locker.clone(),
            hold_count: AtomicU32::new(1),
        })));
        self.retry_task.shutdown_live();
        self.start_renewal(entity.locker.clone());
        debug!("Acquired lock {} as {}", self.config.unique_key(), entity.locker);
        true
    }

    /// Park in the wait queue until an attempt from the front succeeds.
    async fn acquire_queued(self: &Arc<Self>) {
        let node = self.queue.add_waiter();
        let mut guard = WaitGuard {
            core: self,
            node: &node,
            armed: true,
        };

        loop {
            if self.queue.is_front(&node) && self.try_acquire_once().await {
                self.queue.promote_to_head(&node);
                guard.armed = false;
                return;
            }
            if self.owner.load_full().is_none() {
                // No local holder will ever wake us; the record belongs to
                // another process. Poll the backend until it frees up.
                self.start_retry();
            }
            node.wait().await;
        }
    }

    async fn release(&self) -> LockResult<()> {
        let exec = ExecutionId::current();
        let owner = match self.owner.load_full() {
            Some(owner) if owner.exec == exec => owner,
            _ => return Err(LockError::NotLockHolder),
        };

        if owner.hold_count.load(Ordering::SeqCst) > 1 {
            // Inner reentrant release; only the owning execution unit gets
            // here, so the count cannot change between load and decrement
            owner.hold_count.fetch_sub(1, Ordering::SeqCst);
            return Ok(());
        }

        // Outermost release: nothing local is mutated before the backend
        // call. The guard commits the local teardown exactly once, on
        // completion or on drop at the await below; a record the delete
        // never reached then dies by its own lease.
        let _teardown = ReleaseGuard {
            core: self,
            owner: Arc::clone(&owner),
        };
        let entity = LockEntity::initial(owner.locker.clone());
        match self
            .processor
            .release(self.config.unique_key(), &entity)
            .await
        {
            Ok(LockAttempt::Applied) => {
                debug!("Released lock {}", self.config.unique_key());
            }
            Ok(LockAttempt::Conflict) => {
                // Lease already expired or the record was taken over; local
                // cleanup still applies
                debug!("Remote record for {} already gone on release", self.config.unique_key());
            }
            Err(e) => {
                // The lease cleans up remotely on its own; don't fail the caller
                warn!("Release of {} failed: {}", self.config.unique_key(), e);
            }
        }
        Ok(())
    }

    fn start_renewal(self: &Arc<Self>, locker: String) {
        let (handle, claimed) = self.renewal_task.install();
        if claimed {
            let core = self.clone();
            tokio::spawn(async move {
                core.renewal_loop(handle, locker).await;
            });
        }
    }

    fn start_retry(self: &Arc<Self>) {
        let (handle, claimed) = self.retry_task.install();
        if claimed {
            let core = self.clone();
            tokio::spawn(async move {
                core.retry_loop(handle).await;
            });
        }
    }

    /// Keep the held record's expiry pushed out. Runs until released, or
    /// terminates for good once ownership is observed lost.
    async fn renewal_loop(self: Arc<Self>, handle: Arc<TaskHandle>, locker: String) {
        debug!("Lease renewal for {} started", self.config.unique_key());
        sleep(RENEWAL_START_DELAY).await;
        let period = Duration::from_millis((self.config.lease_millis() * 3 / 4).max(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let entity = LockEntity::processing(locker.clone());
                    match self
                        .processor
                        .extend(self.config.unique_key(), &entity, self.config.lease())
                        .await
                    {
                        Ok(LockAttempt::Applied) => {}
                        Ok(LockAttempt::Conflict) => {
                            // The record is no longer ours. The holder finds
                            // out on release; nothing left to renew.
                            warn!("Lease renewal found ownership of {} lost, stopping", self.config.unique_key());
                            break;
                        }
                        Err(e) => {
                            warn!("Lease renewal for {} failed: {}", self.config.unique_key(), e);
                        }
                    }
                }
                _ = handle.shutdown_requested() => {
                    break;
                }
            }
        }
        handle.mark_terminated();
        self.renewal_task.clear(&handle);
        debug!("Lease renewal for {} stopped", self.config.unique_key());
    }

    /// Poll the backend while another process holds the record, waking the
    /// front waiter once it looks free. Terminates as soon as a local owner
    /// appears or no waiter remains.
    async fn retry_loop(self: Arc<Self>, handle: Arc<TaskHandle>) {
        debug!("Retry poll for {} started", self.config.unique_key());
        let lease_millis = self.config.lease_millis();
        sleep(Duration::from_millis((lease_millis / 10).max(1))).await;
        let mut ticker = interval(Duration::from_millis((lease_millis / 6).max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.owner.load_full().is_some() || self.queue.is_empty() {
                        break;
                    }
                    let free = match self.processor.is_free(self.config.unique_key()).await {
                        Ok(free) => free,
                        Err(e) => {
                            // Assume it might be free: a stale wakeup costs one
                            // failed attempt, a missed one stalls the queue
                            warn!("Freedom check for {} failed: {}", self.config.unique_key(), e);
                            true
                        }
                    };
                    if free {
                        self.queue.wake_first();
                    }
                }
                _ = handle.shutdown_requested() => {
                    break;
                }
            }
        }
        handle.mark_terminated();
        self.retry_task.clear(&handle);
        debug!("Retry poll for {} stopped", self.config.unique_key());
    }
}

/// Cancellation guard for a parked waiter. Dropping an `acquire` future
/// mid-wait trips this guard: the node is marked cancelled so walkers skip
/// it, and any wakeup it may have absorbed is handed to the next live waiter.
struct WaitGuard<'a> {
    core: &'a Arc<LockCore>,
    node: &'a Arc<WaitNode>,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.node.cancel();
            self.core.queue.wake_first();
        }
    }
}

/// Teardown guard for the outermost release, fired on completion or when
/// the future is dropped at its backend call. It compare-and-clears the
/// owner keyed on the generation being released; the winner of that swap
/// also stops renewal and wakes the front waiter. A successor owner
/// installed meanwhile is left alone, as is everything else when a
/// duplicate release loses the swap.
struct ReleaseGuard<'a> {
    core: &'a LockCore,
    owner: Arc<OwnerState>,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let expected = Some(Arc::clone(&self.owner));
        let prev = self.core.owner.compare_and_swap(&expected, None);
        if matches!(&*prev, Some(current) if Arc::ptr_eq(current, &self.owner)) {
            self.core.renewal_task.shutdown_live();
            self.core.queue.wake_first();
        }
    }
}
