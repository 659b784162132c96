// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Business logic executed inside a worker context

use super::{ExitStatus, WorkerId};
use rand::rngs::ThreadRng;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Answer of a script to a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    /// Regular reply payload
    Value(T),
    /// Report an error for this request. The worker context stays alive.
    Error(String),
    /// End the worker context with the given status instead of replying
    Exit(ExitStatus),
}

/// Script trait, to be implemented by any logic intended to run in a worker context
pub trait Script<Req, Resp> {
    /// Handle a single request
    fn handle(&mut self, request: Req) -> Reply<Resp>;
}

impl<Req, Resp, F> Script<Req, Resp> for F
where
    F: FnMut(Req) -> Reply<Resp>,
{
    fn handle(&mut self, request: Req) -> Reply<Resp> {
        self(request)
    }
}

/// Script factory.
///
/// Each worker context builds its script within its own thread by calling the factory.
/// In this way, scripts can avoid implementing the Send trait, which may not always be
/// possible. The factory is shared by all workers of a pool and called again whenever a
/// worker context is respawned.
pub type ScriptFactory<Req, Resp> =
    Arc<dyn Fn(WorkerId) -> Box<dyn Script<Req, Resp>> + Send + Sync>;

/// Wrap a closure building a script into a [`ScriptFactory`]
pub fn script_factory<Req, Resp, S, F>(build: F) -> ScriptFactory<Req, Resp>
where
    S: Script<Req, Resp> + 'static,
    F: Fn(WorkerId) -> S + Send + Sync + 'static,
{
    Arc::new(move |id| Box::new(build(id)) as Box<dyn Script<Req, Resp>>)
}

/// Script replying with its input after a random delay, standing in for real work.
pub struct EchoScript {
    rng: ThreadRng,
    delay_ms: RangeInclusive<u64>,
}

impl EchoScript {
    /// Create an echo script sleeping between `min` and `max` before each reply
    pub fn new(min: Duration, max: Duration) -> Self {
        let millis = |duration: Duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let min = millis(min);
        let max = millis(max).max(min);
        Self {
            rng: rand::thread_rng(),
            delay_ms: min..=max,
        }
    }

    /// Factory producing one echo script per worker
    pub fn factory<T: 'static>(min: Duration, max: Duration) -> ScriptFactory<T, T> {
        script_factory(move |_| EchoScript::new(min, max))
    }
}

impl<T> Script<T, T> for EchoScript {
    fn handle(&mut self, request: T) -> Reply<T> {
        let delay = self.rng.gen_range(self.delay_ms.clone());
        thread::sleep(Duration::from_millis(delay));
        Reply::Value(request)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn echo_replies_with_input() {
        let factory = EchoScript::factory::<u32>(Duration::ZERO, Duration::from_millis(2));
        let mut script = factory(WorkerId::from(0));
        assert_eq!(script.handle(7), Reply::Value(7));
        assert_eq!(script.handle(8), Reply::Value(8));
    }

    #[test]
    fn closures_are_scripts() {
        let factory = script_factory(|id: WorkerId| {
            let offset = usize::from(id);
            move |request: usize| Reply::Value(request + offset)
        });
        let mut script = factory(WorkerId::from(3));
        assert_eq!(script.handle(4), Reply::Value(7));
    }

    #[test]
    fn huge_delays_saturate() {
        let script = EchoScript::new(Duration::MAX, Duration::ZERO);
        assert_eq!(script.delay_ms, u64::MAX..=u64::MAX);
    }
}
