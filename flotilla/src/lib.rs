// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! flotilla runs many discrete units of work under a bounded concurrency limit.
//!
//! # Worker pools
//!
//! A [`WorkerPool`](crate::worker_pool::WorkerPool) owns a fixed number of isolated worker
//! contexts. Each context is a thread executing a [`Script`](crate::worker::Script) and
//! is reached only through a [`WorkerChannel`](crate::worker::WorkerChannel), which carries
//! exactly one request and its single reply at a time. Posted items queue up in a FIFO
//! backlog and are handed to whichever worker is idle. The outcome of every item is
//! delivered to a completion handler; a failing item never stops the pool.
//!
//! # Bounded runners
//!
//! A [`BoundedRunner`](crate::runner::BoundedRunner) is the lightweight alternative when no
//! isolation is needed. It runs an async handler over the unit indices `1..=count` on
//! tokio tasks, with at most `concurrency` units in flight, and retries a failed unit
//! once after a fixed backoff.
//!
//! Both support pausing and resuming, and both let the caller await completion.

pub mod configuration;
pub mod error;
pub mod runner;
pub mod worker;
pub mod worker_pool;

/// Re-export the public API
pub mod prelude {
    pub use crate::configuration;
    pub use crate::error::{Error, Result};
    pub use crate::runner::{BoundedRunner, FinishPolicy, ResumePolicy};
    pub use crate::worker::{
        self, script_factory, EchoScript, ExitPolicy, ExitStatus, Reply, Script, ScriptFactory,
        WorkerChannel, WorkerId,
    };
    pub use crate::worker_pool::WorkerPool;
}
