// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Isolated worker contexts and the channels talking to them.
//!
//! A worker context is a dedicated thread running a [`Script`]. The coordinator only
//! exchanges messages with it through a [`WorkerChannel`]: one request in, one reply,
//! error or exit event out.

mod channel;
mod script;
mod thread;

pub use channel::{ChannelConfig, ChannelState, ExitPolicy, WorkerChannel};
pub use script::{script_factory, EchoScript, Reply, Script, ScriptFactory};

use std::fmt::Display;
use std::time::Duration;

/// Worker id type. This id is unique to each worker context of a pool.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl From<usize> for WorkerId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl From<&WorkerId> for usize {
    fn from(value: &WorkerId) -> Self {
        value.0
    }
}

impl From<WorkerId> for usize {
    fn from(value: WorkerId) -> Self {
        value.0
    }
}

impl Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "W{}", self.0)
    }
}

/// Status a worker context ended with.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Regular end of a worker context
    pub const CLEAN: ExitStatus = ExitStatus(0);
    /// The script panicked
    pub const PANIC: ExitStatus = ExitStatus(101);

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::CLEAN
    }
}

impl From<i32> for ExitStatus {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "exit status {}", self.0)
    }
}

/// Wait for `duration`.
///
/// Used for retry backoff and polling intervals.
pub async fn delay(duration: Duration) {
    tokio::time::sleep(duration).await
}
