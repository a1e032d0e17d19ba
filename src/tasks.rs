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

//! Singleton background task slots.
//!
//! ## Purpose
//! Each lock instance runs at most one lease-renewal task and at most one
//! retry-poll task at a time. Any contender may race to start one; a slot
//! guarantees a single live task per concern without any caller holding a
//! mutex across the spawn.
//!
//! ## Design
//! - A `TaskHandle` is a one-shot lifecycle token: created, then running,
//!   then terminated, never reused
//! - `TaskSlot::install` loops until the slot holds a live handle, replacing
//!   terminated tombstones by CAS; exactly one caller per handle claims the
//!   right to spawn the task body
//! - Shutdown is a stored `Notify` permit, so a signal sent while the task is
//!   mid-iteration is picked up at its next select point

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

const CREATED: u8 = 0;
const RUNNING: u8 = 1;
const TERMINATED: u8 = 2;

/// Lifecycle token for one background task.
pub(crate) struct TaskHandle {
    shutdown: Notify,
    state: AtomicU8,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            shutdown: Notify::new(),
            state: AtomicU8::new(CREATED),
        }
    }

    /// Claim the right to spawn this task's body. Succeeds for exactly one
    /// caller per handle.
    pub(crate) fn claim_start(&self) -> bool {
        self.state
            .compare_exchange(CREATED, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Record that the task body has exited. The slot treats a terminated
    /// handle as vacant.
    pub(crate) fn mark_terminated(&self) {
        self.state.store(TERMINATED, Ordering::SeqCst);
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.load(Ordering::SeqCst) == TERMINATED
    }

    /// Ask the task body to stop at its next select point.
    pub(crate) fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once shutdown has been requested.
    pub(crate) async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }
}

/// Holder for the single live instance of one background task.
pub(crate) struct TaskSlot {
    cell: ArcSwapOption<TaskHandle>,
}

impl TaskSlot {
    pub(crate) fn new() -> Self {
        Self {
            cell: ArcSwapOption::new(None),
        }
    }

    /// Ensure the slot holds a live handle and return it, along with whether
    /// the caller won the claim to spawn the task body. A terminated handle
    /// left behind by a finished task is replaced, not restarted.
    pub(crate) fn install(&self) -> (Arc<TaskHandle>, bool) {
        loop {
            let current = self.cell.load_full();
            if let Some(handle) = &current {
                if !handle.is_terminated() {
                    let claimed = handle.claim_start();
                    return (handle.clone(), claimed);
                }
            }
            // Empty or tombstoned: race to swap in a fresh handle, then
            // re-read whichever handle won
            self.cell
                .compare_and_swap(&current, Some(Arc::new(TaskHandle::new())));
        }
    }

    /// Take the current handle out of the slot and signal its task to stop.
    /// The slot is vacant as soon as this returns, so the next `install`
    /// starts a fresh task without waiting for the old body to observe the
    /// signal and deregister itself.
    pub(crate) fn shutdown_live(&self) {
        if let Some(handle) = self.cell.swap(None) {
            if !handle.is_terminated() {
                handle.request_shutdown();
            }
        }
    }

    /// Drop the slot's reference to a finished handle. A no-op when the slot
    /// already moved on to a newer handle.
    pub(crate) fn clear(&self, handle: &Arc<TaskHandle>) {
        self.cell.compare_and_swap(&Some(handle.clone()), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_install_claims_exactly_once() {
        let slot = TaskSlot::new();

        let (first, claimed_first) = slot.install();
        let (second, claimed_second) = slot.install();

        assert!(claimed_first);
        assert!(!claimed_second);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_terminated_handle_is_replaced() {
        let slot = TaskSlot::new();

        let (first, _) = slot.install();
        first.mark_terminated();

        let (second, claimed) = slot.install();
        assert!(claimed);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_shutdown_permit_is_stored() {
        let slot = TaskSlot::new();
        let (handle, _) = slot.install();

        // Signal before anyone waits; the permit must not be lost
        slot.shutdown_live();

        timeout(Duration::from_millis(200), handle.shutdown_requested())
            .await
            .expect("stored shutdown permit should resolve the wait");
    }

    #[tokio::test]
    async fn test_shutdown_live_ignores_tombstone() {
        let slot = TaskSlot::new();
        let (handle, _) = slot.install();
        handle.mark_terminated();

        // Must not panic or signal anything
        slot.shutdown_live();

        let waited = timeout(Duration::from_millis(50), handle.shutdown_requested()).await;
        assert!(waited.is_err(), "terminated handle should not be signalled");
    }

    #[tokio::test]
    async fn test_shutdown_vacates_the_slot() {
        let slot = TaskSlot::new();
        let (old, _) = slot.install();

        slot.shutdown_live();

        // The old task has not exited yet, but the slot already accepts a
        // fresh handle
        let (fresh, claimed) = slot.install();
        assert!(claimed);
        assert!(!Arc::ptr_eq(&old, &fresh));

        // The old task's own deregistration must not evict the newcomer
        old.mark_terminated();
        slot.clear(&old);
        let (still, claimed) = slot.install();
        assert!(!claimed);
        assert!(Arc::ptr_eq(&still, &fresh));
    }

    #[tokio::test]
    async fn test_clear_releases_only_own_handle() {
        let slot = TaskSlot::new();
        let (first, _) = slot.install();
        first.mark_terminated();
        let (second, _) = slot.install();

        // Stale clear from the finished first task must not evict the second
        slot.clear(&first);
        let (still, claimed) = slot.install();
        assert!(!claimed);
        assert!(Arc::ptr_eq(&still, &second));

        second.mark_terminated();
        slot.clear(&second);
        let (fresh, claimed) = slot.install();
        assert!(claimed);
        assert!(!Arc::ptr_eq(&fresh, &second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_install_single_claimer() {
        let slot = Arc::new(TaskSlot::new());
        let claims = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let slot = slot.clone();
            let claims = claims.clone();
            handles.push(tokio::spawn(async move {
                let (_, claimed) = slot.install();
                if claimed {
                    claims.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(claims.load(Ordering::SeqCst), 1);
    }
}
