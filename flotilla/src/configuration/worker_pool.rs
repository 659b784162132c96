// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Worker pool builder

use crate::error::Result;
use crate::worker::{ChannelConfig, ExitPolicy, ScriptFactory};
use crate::worker_pool::WorkerPool;

/// Configuration of a worker pool
pub struct Builder<Req, Resp> {
    /// Number of worker contexts, i.e. the maximum number of items in flight
    concurrency: usize,
    /// Script run by every worker context
    factory: ScriptFactory<Req, Resp>,
    /// Parameters for spawning each worker context
    channel: ChannelConfig,
}

/// Worker pool builder
impl<Req, Resp> Builder<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a builder for a pool of `concurrency` workers running scripts from `factory`
    pub fn new(factory: ScriptFactory<Req, Resp>, concurrency: usize) -> Self {
        assert!(concurrency > 0, "cannot create worker pool without workers");
        Self {
            concurrency,
            factory,
            channel: ChannelConfig::default(),
        }
    }

    /// Set worker threads' stack size
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.channel.stack_size = Some(stack_size);
        self
    }

    /// Set the prefix of worker thread names
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel.name_prefix = prefix.into();
        self
    }

    /// Set how exits of worker contexts with a pending item are reported
    pub fn exit_policy(mut self, exit_policy: ExitPolicy) -> Self {
        self.channel.exit_policy = exit_policy;
        self
    }

    /// Build the worker pool. `handler` is called once per settled item.
    ///
    /// The pool spawns no worker before [`WorkerPool::initialize`].
    pub fn build<H>(self, handler: H) -> WorkerPool<Req, Resp>
    where
        H: Fn(Result<Option<Resp>>) + Send + Sync + 'static,
    {
        WorkerPool::new(self.concurrency, self.factory, self.channel, handler)
    }
}
