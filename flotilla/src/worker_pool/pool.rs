// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::worker::{ChannelConfig, ChannelState, ScriptFactory, WorkerChannel, WorkerId};
use flotilla_log::{debug, error, info, trace, warn};
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{oneshot, watch};

/// Callback receiving the outcome of every settled item.
///
/// A panicking handler ends the task that settled the item. The pool still counts the
/// item as settled, keeps dispatching and releases drain waiters.
pub type CompletionHandler<Resp> = Arc<dyn Fn(Result<Option<Resp>>) + Send + Sync>;

/// A fixed size pool of worker contexts processing a FIFO backlog of items.
///
/// Cloning yields another handle to the same pool. All operations that may dispatch
/// items spawn tasks and must be called from within a tokio runtime.
pub struct WorkerPool<Req, Resp> {
    shared: Arc<Shared<Req, Resp>>,
}

impl<Req, Resp> Clone for WorkerPool<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<Req, Resp> {
    concurrency: usize,
    factory: ScriptFactory<Req, Resp>,
    channel_config: ChannelConfig,
    handler: CompletionHandler<Resp>,
    state: Mutex<PoolState<Req, Resp>>,
    /// Items dispatched whose completion handler has not returned yet
    unsettled: watch::Sender<usize>,
}

struct PoolState<Req, Resp> {
    /// Worker slots, empty while the pool is not initialized
    channels: Vec<Arc<WorkerChannel<Req, Resp>>>,
    /// Indices of idle workers, handed out oldest first
    available: VecDeque<usize>,
    busy: usize,
    unsettled: usize,
    backlog: VecDeque<Req>,
    active: bool,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

impl<Req, Resp> WorkerPool<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a new worker pool. No worker is spawned before [`WorkerPool::initialize`].
    pub fn new<H>(
        concurrency: usize,
        factory: ScriptFactory<Req, Resp>,
        channel_config: ChannelConfig,
        handler: H,
    ) -> Self
    where
        H: Fn(Result<Option<Resp>>) + Send + Sync + 'static,
    {
        assert!(concurrency > 0, "cannot create worker pool without workers");

        let state = PoolState {
            channels: Vec::with_capacity(concurrency),
            available: VecDeque::with_capacity(concurrency),
            busy: 0,
            unsettled: 0,
            backlog: VecDeque::new(),
            active: false,
            drain_waiters: Vec::new(),
        };

        Self {
            shared: Arc::new(Shared {
                concurrency,
                factory,
                channel_config,
                handler: Arc::new(handler),
                state: Mutex::new(state),
                unsettled: watch::Sender::new(0),
            }),
        }
    }

    /// Spawn all workers, activate the pool and dispatch any pending backlog
    pub fn initialize(&self) -> Result<()> {
        {
            let mut state = self.shared.lock();
            if !state.channels.is_empty() {
                return Err(Error::AlreadyInitialized);
            }

            let mut channels = Vec::with_capacity(self.shared.concurrency);
            for index in 0..self.shared.concurrency {
                match self.shared.spawn_channel(index) {
                    Ok(channel) => channels.push(Arc::new(channel)),
                    Err(e) => {
                        for channel in &channels {
                            channel.terminate();
                        }
                        return Err(e);
                    }
                }
            }

            state.channels = channels;
            state.available = (0..self.shared.concurrency).collect();
            state.busy = 0;
            state.active = true;
        }

        info!(
            "Initialized worker pool with {} workers",
            self.shared.concurrency
        );
        self.shared.dispatch();
        Ok(())
    }

    /// Append `items` to the backlog and dispatch as many as idle workers allow.
    ///
    /// The items are enqueued before this function returns. Without `await_drain` the
    /// returned future is ready immediately. With `await_drain` it completes once the
    /// backlog is found empty after an item settled, or right away if the backlog is empty
    /// and no worker is busy. Items posted concurrently by other callers count towards
    /// the same backlog.
    pub fn post<I>(&self, items: I, await_drain: bool) -> BoxFuture<'static, ()>
    where
        I: IntoIterator<Item = Req>,
    {
        {
            let mut state = self.shared.lock();
            let before = state.backlog.len();
            state.backlog.extend(items);
            trace!("Posted {} items", state.backlog.len() - before);
        }
        self.shared.dispatch();

        if !await_drain {
            return future::ready(()).boxed();
        }

        let mut state = self.shared.lock();
        if state.backlog.is_empty() && state.busy == 0 {
            return future::ready(()).boxed();
        }
        let (sender, receiver) = oneshot::channel();
        state.drain_waiters.push(sender);
        // A dropped pool releases the waiter as well
        receiver.map(|_| ()).boxed()
    }

    /// Stop dispatching new items. Busy workers complete their current item.
    pub fn pause(&self) {
        self.shared.lock().active = false;
        info!("Paused worker pool");
    }

    /// Resume dispatching items
    pub fn resume(&self) {
        self.shared.lock().active = true;
        info!("Resumed worker pool");
        self.shared.dispatch();
    }

    /// Stop the pool.
    ///
    /// Stops dispatching, waits until no worker is busy and every settled item went
    /// through the completion handler, then terminates all workers. The backlog is kept and dispatched after the next
    /// [`WorkerPool::initialize`].
    pub async fn stop(&self) {
        self.shared.lock().active = false;
        info!("Stopping worker pool");

        let mut unsettled = self.shared.unsettled.subscribe();
        let channels = loop {
            // The sender lives as long as `self`
            let _ = unsettled.wait_for(|unsettled| *unsettled == 0).await;

            let mut state = self.shared.lock();
            // A concurrent resume may have dispatched again in the meantime
            if state.unsettled == 0 {
                state.available.clear();
                break mem::take(&mut state.channels);
            }
        };

        channels.iter().for_each(|channel| channel.terminate());
        info!("Stopped worker pool, terminated {} workers", channels.len());
    }
}

impl<Req, Resp> WorkerPool<Req, Resp> {
    /// Number of workers of this pool
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }

    /// Number of idle and busy workers, read at the same instant
    pub fn occupancy(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.available.len(), state.busy)
    }

    /// Number of items waiting for dispatch
    pub fn backlog_len(&self) -> usize {
        self.shared.lock().backlog.len()
    }

    /// Whether the pool currently dispatches items
    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    #[cfg(test)]
    pub(super) fn channels(&self) -> Vec<Arc<WorkerChannel<Req, Resp>>> {
        self.shared.lock().channels.clone()
    }
}

impl<Req, Resp> Shared<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn spawn_channel(&self, index: usize) -> Result<WorkerChannel<Req, Resp>> {
        WorkerChannel::spawn(
            WorkerId::from(index),
            Arc::clone(&self.factory),
            &self.channel_config,
        )
    }

    /// Assign backlog items to idle workers, oldest item to longest idle worker
    fn dispatch(self: &Arc<Self>) {
        let assignments = {
            let mut state = self.lock();
            let mut assignments = Vec::new();
            while state.active && !state.backlog.is_empty() && !state.available.is_empty() {
                let (Some(index), Some(item)) =
                    (state.available.pop_front(), state.backlog.pop_front())
                else {
                    break;
                };
                state.busy += 1;
                state.unsettled += 1;
                assignments.push((index, Arc::clone(&state.channels[index]), item));
            }
            self.unsettled.send_replace(state.unsettled);
            assignments
        };

        for (index, channel, item) in assignments {
            trace!("Dispatching item to worker {}", channel.id());
            tokio::spawn(Arc::clone(self).process(index, channel, item));
        }
    }

    /// Run one item on a worker and account for its settlement
    async fn process(
        self: Arc<Self>,
        index: usize,
        channel: Arc<WorkerChannel<Req, Resp>>,
        item: Req,
    ) {
        let result = channel.issue(item).await;

        {
            let mut state = self.lock();
            self.restore(&mut state, index, &channel);
            state.available.push_back(index);
            state.busy -= 1;
        }

        let _settlement = Settlement { shared: &self };
        (self.handler)(result);
    }

    /// Account for a settled item after its completion handler returned or panicked
    fn settled(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            state.unsettled -= 1;
            self.unsettled.send_replace(state.unsettled);
        }

        self.dispatch();

        let waiters = {
            let mut state = self.lock();
            if state.backlog.is_empty() {
                mem::take(&mut state.drain_waiters)
            } else {
                Vec::new()
            }
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Make the worker in slot `index` usable again after a failed item
    fn restore(
        &self,
        state: &mut PoolState<Req, Resp>,
        index: usize,
        channel: &WorkerChannel<Req, Resp>,
    ) {
        match channel.state() {
            ChannelState::Errored => {
                if let Err(e) = channel.recover() {
                    error!("Failed to recover worker {}: {e}", channel.id());
                }
            }
            ChannelState::Exited => {
                warn!("Worker {} exited, respawning", channel.id());
                match self.spawn_channel(index) {
                    Ok(respawned) => state.channels[index] = Arc::new(respawned),
                    Err(e) => error!("Failed to respawn worker {}: {e}", channel.id()),
                }
            }
            ChannelState::Idle | ChannelState::Busy | ChannelState::Terminated => {
                debug!("Worker {} settled", channel.id());
            }
        }
    }
}

/// Completes the settlement of an item when dropped
struct Settlement<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    shared: &'a Arc<Shared<Req, Resp>>,
}

impl<Req, Resp> Drop for Settlement<'_, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("Completion handler panicked");
        }
        self.shared.settled();
    }
}

impl<Req, Resp> Shared<Req, Resp> {
    fn lock(&self) -> MutexGuard<'_, PoolState<Req, Resp>> {
        self.state.lock().expect("worker pool lock poisoned")
    }
}
