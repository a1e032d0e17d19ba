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

//! Local wait queue for contending tasks.
//!
//! ## Purpose
//! Multiplexes all local contenders for one lock onto a single remote
//! contention slot: only the front waiter is woken to race for the backend
//! record, everyone else stays parked. A variant of the CLH lock queue,
//! deliberately unfair: a fresh caller that shows up between a release and
//! the woken waiter's retry may still win the backend race, because the
//! remote store, not local queue position, decides ownership.
//!
//! ## Design
//! - Lock-free append: CAS on `tail`, with a lazily installed dummy head on
//!   first contention
//! - Wake targets the first live node after `head`, nothing else
//! - Only a winning acquirer moves `head` (to its own node) and severs the
//!   old head's forward link
//! - A node whose waiting future was dropped is marked cancelled and skipped;
//!   it hands any pending wakeup on to the next live node

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// One parked contender.
///
/// The `Notify` carries at most one stored wakeup, which gives the same
/// semantics as a parking token: a wake delivered before the task parks is
/// not lost.
pub(crate) struct WaitNode {
    waiter: Notify,
    cancelled: AtomicBool,
    prev: ArcSwapOption<WaitNode>,
    next: ArcSwapOption<WaitNode>,
}

impl WaitNode {
    fn new() -> Self {
        Self {
            waiter: Notify::new(),
            cancelled: AtomicBool::new(false),
            prev: ArcSwapOption::new(None),
            next: ArcSwapOption::new(None),
        }
    }

    /// Park until woken. Safe against wake-before-park and spurious wakeups;
    /// callers re-check their condition in a loop.
    pub(crate) async fn wait(&self) {
        self.waiter.notified().await;
    }

    /// Deliver one wakeup, stored if the task is not parked yet.
    pub(crate) fn wake(&self) {
        self.waiter.notify_one();
    }

    /// Mark this node as no longer waiting. The node stays linked forward;
    /// walkers skip it. The backward link is dropped so an abandoned run of
    /// nodes frees itself once the head moves past it, instead of pinning
    /// itself through prev/next reference cycles.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.prev.store(None);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn same_node(a: &Option<Arc<WaitNode>>, b: &Option<Arc<WaitNode>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// CLH-variant wait queue. Head and tail are lazily initialized on first
/// contention and never reset to empty; an empty queue is one with no live
/// node after `head`.
pub(crate) struct WaitQueue {
    head: ArcSwapOption<WaitNode>,
    tail: ArcSwapOption<WaitNode>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self {
            head: ArcSwapOption::new(None),
            tail: ArcSwapOption::new(None),
        }
    }

    fn cas_head(&self, current: &Option<Arc<WaitNode>>, new: Option<Arc<WaitNode>>) -> bool {
        let prev = self.head.compare_and_swap(current, new);
        same_node(&prev, current)
    }

    fn cas_tail(&self, current: &Option<Arc<WaitNode>>, new: Option<Arc<WaitNode>>) -> bool {
        let prev = self.tail.compare_and_swap(current, new);
        same_node(&prev, current)
    }

    /// Append the calling task as a new waiter.
    pub(crate) fn add_waiter(&self) -> Arc<WaitNode> {
        let node = Arc::new(WaitNode::new());

        // Fast path: CAS the observed tail, fall back to the full loop
        let pred = self.tail.load_full();
        if let Some(pred) = pred {
            node.prev.store(Some(pred.clone()));
            if self.cas_tail(&Some(pred.clone()), Some(node.clone())) {
                pred.next.store(Some(node.clone()));
                return node;
            }
        }

        self.enq(&node);
        node
    }

    fn enq(&self, node: &Arc<WaitNode>) {
        loop {
            let tail = self.tail.load_full();
            match tail {
                None => {
                    // First contention: install the dummy head, then publish
                    // the tail. A racing enqueuer spins on the empty tail
                    // until the winner's store lands.
                    let dummy = Arc::new(WaitNode::new());
                    dummy.next.store(Some(node.clone()));
                    node.prev.store(Some(dummy.clone()));
                    if self.cas_head(&None, Some(dummy)) {
                        self.tail.store(Some(node.clone()));
                        return;
                    }
                }
                Some(tail) => {
                    node.prev.store(Some(tail.clone()));
                    if self.cas_tail(&Some(tail.clone()), Some(node.clone())) {
                        tail.next.store(Some(node.clone()));
                        return;
                    }
                }
            }
        }
    }

    /// First live waiter after the head, the only node eligible to race for
    /// the backend record.
    pub(crate) fn first_waiter(&self) -> Option<Arc<WaitNode>> {
        let head = self.head.load_full()?;
        let mut cursor = head.next.load_full();
        while let Some(node) = cursor {
            if !node.is_cancelled() {
                return Some(node);
            }
            cursor = node.next.load_full();
        }
        None
    }

    /// True when `node` is the front of the queue.
    pub(crate) fn is_front(&self, node: &Arc<WaitNode>) -> bool {
        match self.first_waiter() {
            Some(front) => Arc::ptr_eq(&front, node),
            None => false,
        }
    }

    /// True when no live waiter is queued.
    pub(crate) fn is_empty(&self) -> bool {
        self.first_waiter().is_none()
    }

    /// Wake the front waiter so it can race for the lock.
    pub(crate) fn wake_first(&self) {
        if let Some(front) = self.first_waiter() {
            front.wake();
        }
    }

    /// Install the winning node as the new head. Called only by the task that
    /// just acquired the backend record, so head moves are serialized by lock
    /// ownership. Severing the old head's forward link is memory cleanup, not
    /// a correctness requirement.
    pub(crate) fn promote_to_head(&self, node: &Arc<WaitNode>) {
        let old_head = self.head.swap(Some(node.clone()));
        node.prev.store(None);
        if let Some(old) = old_head {
            old.next.store(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_first_enqueue_installs_dummy_head() {
        let queue = WaitQueue::new();
        assert!(queue.is_empty());

        let node = queue.add_waiter();

        let head = queue.head.load_full().unwrap();
        assert!(head.next.load_full().map(|n| Arc::ptr_eq(&n, &node)).unwrap_or(false));
        assert!(queue.is_front(&node));
        assert!(!queue.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_front_order() {
        let queue = WaitQueue::new();
        let first = queue.add_waiter();
        let second = queue.add_waiter();

        assert!(queue.is_front(&first));
        assert!(!queue.is_front(&second));
    }

    #[tokio::test]
    async fn test_cancelled_node_is_skipped() {
        let queue = WaitQueue::new();
        let first = queue.add_waiter();
        let second = queue.add_waiter();

        first.cancel();

        assert!(!queue.is_front(&first));
        assert!(queue.is_front(&second));

        second.cancel();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_promote_to_head_advances_queue() {
        let queue = WaitQueue::new();
        let first = queue.add_waiter();
        let second = queue.add_waiter();

        queue.promote_to_head(&first);

        assert!(queue.is_front(&second));
        assert!(first.prev.load_full().is_none());
    }

    #[tokio::test]
    async fn test_promoted_last_waiter_leaves_empty_queue() {
        let queue = WaitQueue::new();
        let only = queue.add_waiter();

        queue.promote_to_head(&only);
        assert!(queue.is_empty());

        // The queue stays usable after draining
        let next = queue.add_waiter();
        assert!(queue.is_front(&next));
    }

    #[tokio::test]
    async fn test_wake_before_wait_is_not_lost() {
        let queue = WaitQueue::new();
        let node = queue.add_waiter();

        queue.wake_first();

        timeout(Duration::from_millis(200), node.wait())
            .await
            .expect("stored wakeup should complete an immediate wait");
    }

    #[tokio::test]
    async fn test_wake_first_skips_cancelled() {
        let queue = WaitQueue::new();
        let first = queue.add_waiter();
        let second = queue.add_waiter();

        first.cancel();
        queue.wake_first();

        timeout(Duration::from_millis(200), second.wait())
            .await
            .expect("wake should land on the first live waiter");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_links_every_node() {
        let queue = Arc::new(WaitQueue::new());
        let mut handles = vec![];
        for _ in 0..50 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.add_waiter() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Walk the chain from head: every enqueued node must be reachable
        let mut count = 0;
        let mut cursor = queue.head.load_full().and_then(|h| h.next.load_full());
        while let Some(node) = cursor {
            count += 1;
            cursor = node.next.load_full();
        }
        assert_eq!(count, 50);
    }
}
