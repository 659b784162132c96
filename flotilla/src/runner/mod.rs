// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded concurrency runner.
//!
//! Runs an async handler over the unit indices `1..=count` with at most `concurrency`
//! units in flight. Units are claimed from a shared cursor by a fixed set of tasks, so
//! each index is handed out exactly once. No worker isolation is involved; use a
//! [`WorkerPool`](crate::worker_pool::WorkerPool) where units need their own context.

mod bounded;

pub use bounded::{BoundedRunner, UnitHandler};

/// When a runner signals that it has finished
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FinishPolicy {
    /// As soon as a unit settles after the last unit has been claimed. Other units may
    /// still be in flight, including units waiting for their retry.
    #[default]
    CursorExhausted,
    /// Once the last unit has been claimed and no unit is in flight anymore
    Drained,
}

/// How many tasks a runner relaunches on resume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// `min(concurrency, count - concurrency)` tasks, regardless of tasks still running
    /// or units left
    #[default]
    Literal,
    /// Enough tasks to fill the concurrency width again, at most one per unclaimed unit
    Remaining,
}
