// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use super::{FinishPolicy, ResumePolicy};
use crate::configuration::runner::Builder;
use crate::error::Result;
use crate::worker::delay;
use flotilla_log::{error, info, trace, warn};
use futures::future::BoxFuture;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Type erased unit handler
pub type UnitHandler = Arc<dyn Fn(usize) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle to a running bounded runner. Cloning yields another handle to the same runner.
#[derive(Clone)]
pub struct BoundedRunner {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    count: usize,
    width: usize,
    backoff: Duration,
    retries: usize,
    finish_policy: FinishPolicy,
    resume_policy: ResumePolicy,
    handler: UnitHandler,
    /// Last claimed unit index, 0 before the first claim
    cursor: AtomicUsize,
    /// Units in flight
    processing: watch::Sender<usize>,
    /// Tasks currently claiming units
    loops: AtomicUsize,
    paused: AtomicBool,
    finished: watch::Sender<bool>,
}

impl BoundedRunner {
    /// Start processing units `1..=count` with `handler`, at most `concurrency` at a time.
    ///
    /// Uses the default backoff, a single retry and the default policies. See
    /// [`Builder`] for other settings.
    pub fn start<H, Fut, E>(
        name: impl Into<String>,
        handler: H,
        count: usize,
        concurrency: usize,
    ) -> Self
    where
        H: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display,
    {
        Builder::new(name, count, concurrency).start(handler)
    }

    pub(crate) fn launch(config: Builder, handler: UnitHandler) -> Self {
        let width = config.concurrency.min(config.count);
        let runner = Self {
            inner: Arc::new(Inner {
                name: config.name,
                count: config.count,
                width,
                backoff: config.backoff,
                retries: config.retries,
                finish_policy: config.finish_policy,
                resume_policy: config.resume_policy,
                handler,
                cursor: AtomicUsize::new(0),
                processing: watch::Sender::new(0),
                loops: AtomicUsize::new(0),
                paused: AtomicBool::new(false),
                finished: watch::Sender::new(false),
            }),
        };

        info!(
            "Runner {} starting {} units with concurrency {width}",
            runner.inner.name, runner.inner.count
        );
        runner.spawn_loops(width);
        runner
    }

    /// Stop claiming new units.
    ///
    /// Units in flight are not cancelled. The returned future completes once none of
    /// them is in flight anymore.
    pub fn pause(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.paused.store(true, Ordering::SeqCst);
        info!("Runner {} paused", self.inner.name);

        let mut processing = self.inner.processing.subscribe();
        async move {
            let _ = processing.wait_for(|processing| *processing == 0).await;
        }
    }

    /// Continue claiming units after [`BoundedRunner::pause`]
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);

        let inner = &self.inner;
        let relaunch = match inner.resume_policy {
            ResumePolicy::Literal => inner.width.min(inner.count.saturating_sub(inner.width)),
            ResumePolicy::Remaining => {
                let running = inner.loops.load(Ordering::SeqCst);
                let unclaimed = inner.count - inner.cursor.load(Ordering::SeqCst);
                inner.width.saturating_sub(running).min(unclaimed)
            }
        };

        info!("Runner {} resumed with {relaunch} tasks", inner.name);
        self.spawn_loops(relaunch);
    }

    /// Wait until the runner has finished according to its [`FinishPolicy`]
    pub async fn wait_finish(&self) {
        if self.inner.finish_reached() {
            return;
        }
        let mut finished = self.inner.finished.subscribe();
        let _ = finished.wait_for(|finished| *finished).await;
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of units
    pub fn count(&self) -> usize {
        self.inner.count
    }

    /// Effective concurrency width, never larger than the number of units
    pub fn concurrency(&self) -> usize {
        self.inner.width
    }

    /// Last claimed unit index
    pub fn cursor(&self) -> usize {
        self.inner.cursor.load(Ordering::SeqCst)
    }

    /// Number of units in flight
    pub fn processing(&self) -> usize {
        *self.inner.processing.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.finished.borrow() || self.inner.finish_reached()
    }

    /// Claim the first unit of each of `n` loops right away and spawn the loops
    fn spawn_loops(&self, n: usize) {
        for _ in 0..n {
            let Some(unit) = self.inner.begin_unit() else {
                break;
            };
            self.inner.loops.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(Arc::clone(&self.inner).consume(unit));
        }
    }
}

impl Inner {
    /// Process `unit`, then claim units one after another until paused or out of units
    async fn consume(self: Arc<Self>, mut unit: usize) {
        loop {
            self.process(unit).await;
            self.processing.send_modify(|processing| *processing -= 1);
            self.check_finish();

            if self.paused.load(Ordering::SeqCst) {
                break;
            }
            match self.begin_unit() {
                Some(next) => unit = next,
                None => break,
            }
        }
        self.loops.fetch_sub(1, Ordering::SeqCst);
    }

    /// Claim the next unit and count it as in flight
    fn begin_unit(&self) -> Option<usize> {
        // Counted before the claim so the last unit never looks drained while claimed
        self.processing.send_modify(|processing| *processing += 1);
        let unit = self.claim();
        if unit.is_none() {
            self.processing.send_modify(|processing| *processing -= 1);
            self.check_finish();
        }
        unit
    }

    fn check_finish(&self) {
        if self.finish_reached() && !self.finished.send_replace(true) {
            info!("Runner {} finished", self.name);
        }
    }

    /// Hand out the next unit index. Each index in `1..=count` is returned exactly once.
    fn claim(&self) -> Option<usize> {
        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cursor| {
                (cursor < self.count).then_some(cursor + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Run the handler for `unit`, retrying failures after the backoff
    async fn process(&self, unit: usize) {
        let mut attempt = 0;
        loop {
            match (self.handler)(unit).await {
                Ok(()) => {
                    trace!("Runner {}: unit {unit} done", self.name);
                    return;
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Runner {}: unit {unit} failed, retrying in {:?}: {e}",
                        self.name, self.backoff
                    );
                    delay(self.backoff).await;
                }
                Err(e) => {
                    error!("Runner {}: dropping unit {unit}: {e}", self.name);
                    return;
                }
            }
        }
    }

    fn finish_reached(&self) -> bool {
        let exhausted = self.cursor.load(Ordering::SeqCst) >= self.count;
        match self.finish_policy {
            FinishPolicy::CursorExhausted => exhausted,
            FinishPolicy::Drained => exhausted && *self.processing.borrow() == 0,
        }
    }
}
