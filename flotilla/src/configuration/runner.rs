// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Bounded runner builder

use crate::error::Error;
use crate::runner::{BoundedRunner, FinishPolicy, ResumePolicy, UnitHandler};
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Delay before a failed unit is retried
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(5000);

/// Configuration of a bounded runner
#[derive(Debug, Clone)]
pub struct Builder {
    /// Name used in log messages
    pub name: String,
    /// Number of units, handed out as `1..=count`
    pub count: usize,
    /// Maximum number of units in flight
    pub concurrency: usize,
    /// Delay before retrying a failed unit
    pub backoff: Duration,
    /// Number of retries of a failed unit before it is dropped
    pub retries: usize,
    pub finish_policy: FinishPolicy,
    pub resume_policy: ResumePolicy,
}

impl Builder {
    pub fn new(name: impl Into<String>, count: usize, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            count,
            concurrency,
            backoff: DEFAULT_BACKOFF,
            retries: 1,
            finish_policy: FinishPolicy::default(),
            resume_policy: ResumePolicy::default(),
        }
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn finish_policy(mut self, finish_policy: FinishPolicy) -> Self {
        self.finish_policy = finish_policy;
        self
    }

    pub fn resume_policy(mut self, resume_policy: ResumePolicy) -> Self {
        self.resume_policy = resume_policy;
        self
    }

    /// Start the runner with `handler` processing each unit.
    ///
    /// Processing begins right away on tasks of the current tokio runtime.
    pub fn start<H, Fut, E>(self, handler: H) -> BoundedRunner
    where
        H: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let handler: UnitHandler = Arc::new(move |unit| {
            handler(unit)
                .map(|result| result.map_err(|e| Error::Handler(e.to_string())))
                .boxed()
        });
        BoundedRunner::launch(self, handler)
    }
}
