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

//! Holder identity: which execution unit is asking for the lock.
//!
//! The locker string written into the remote record is
//! `<host>-<pid>-<execution id>`. Host and pid distinguish processes across
//! the fleet; the execution id distinguishes concurrent tasks within one
//! process. The same string is rebuilt on every call from the same task, so
//! it doubles as the reentrancy identity.

use std::fmt;
use std::sync::OnceLock;

/// Identity of the calling execution unit within this process.
///
/// Inside the Tokio runtime this is the task id; outside a task (say a
/// blocking thread driving `block_on`) it falls back to the thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExecutionId {
    Task(tokio::task::Id),
    Thread(std::thread::ThreadId),
}

impl ExecutionId {
    /// Identity of the current task or thread.
    pub(crate) fn current() -> Self {
        match tokio::task::try_id() {
            Some(id) => ExecutionId::Task(id),
            None => ExecutionId::Thread(std::thread::current().id()),
        }
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionId::Task(id) => write!(f, "task-{}", id),
            ExecutionId::Thread(id) => write!(f, "thread-{:?}", id),
        }
    }
}

/// Best-effort local host name, resolved once.
fn host_address() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "localhost".to_string())
    })
}

/// Locker string for a given execution id.
pub(crate) fn locker_for(exec: ExecutionId) -> String {
    format!("{}-{}-{}", host_address(), std::process::id(), exec)
}
