// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use super::WorkerPool;
use crate::configuration::worker_pool::Builder;
use crate::error::{Error, Result};
use crate::worker::{
    delay, script_factory, ChannelState, EchoScript, ExitPolicy, ExitStatus, Reply, ScriptFactory,
};
use flotilla_log::LevelFilter;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

const PATIENCE: Duration = Duration::from_secs(5);

type Outcomes = UnboundedReceiver<Result<Option<u32>>>;

/// Build a pool whose completion handler forwards every outcome to the returned receiver
fn pool_with(
    factory: ScriptFactory<u32, u32>,
    concurrency: usize,
) -> (WorkerPool<u32, u32>, Outcomes) {
    flotilla_logger::try_init(LevelFilter::Warn);
    let (sender, receiver) = unbounded_channel();
    let pool = Builder::new(factory, concurrency)
        .name_prefix("test")
        .build(move |outcome| {
            let _ = sender.send(outcome);
        });
    (pool, receiver)
}

/// Script recording every request it starts, then echoing it after `work`
fn recording(seen: &Arc<Mutex<Vec<u32>>>, work: Duration) -> ScriptFactory<u32, u32> {
    let seen = Arc::clone(seen);
    script_factory(move |_| {
        let seen = Arc::clone(&seen);
        move |request: u32| {
            seen.lock().unwrap().push(request);
            thread::sleep(work);
            Reply::Value(request)
        }
    })
}

async fn collect(outcomes: &mut Outcomes, n: usize) -> Vec<Result<Option<u32>>> {
    let mut collected = Vec::with_capacity(n);
    for _ in 0..n {
        let outcome = timeout(PATIENCE, outcomes.recv())
            .await
            .expect("timed out waiting for item")
            .expect("pool dropped its handler");
        collected.push(outcome);
    }
    collected
}

fn values(outcomes: Vec<Result<Option<u32>>>) -> Vec<u32> {
    let mut values: Vec<u32> = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap().unwrap())
        .collect();
    values.sort_unstable();
    values
}

#[tokio::test]
async fn drains_backlog_across_workers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (pool, mut outcomes) = pool_with(recording(&seen, Duration::from_millis(20)), 3);
    pool.initialize().unwrap();

    // Resolves once the last two items left the backlog
    timeout(PATIENCE, pool.post(1..=5, true)).await.unwrap();
    assert_eq!(pool.backlog_len(), 0);

    assert_eq!(values(collect(&mut outcomes, 5).await), vec![1, 2, 3, 4, 5]);
    let mut dispatched = seen.lock().unwrap().clone();
    dispatched.sort_unstable();
    assert_eq!(dispatched, vec![1, 2, 3, 4, 5]);

    pool.stop().await;
}

#[tokio::test]
async fn dispatches_in_posting_order() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (pool, mut outcomes) = pool_with(recording(&seen, Duration::from_millis(1)), 1);
    pool.initialize().unwrap();

    let _ = pool.post([4, 8, 15], false);
    let _ = pool.post([16, 23, 42], false);
    collect(&mut outcomes, 6).await;

    assert_eq!(*seen.lock().unwrap(), vec![4, 8, 15, 16, 23, 42]);
    pool.stop().await;
}

#[tokio::test]
async fn occupancy_always_adds_up_to_concurrency() {
    let factory = EchoScript::factory(Duration::from_millis(1), Duration::from_millis(10));
    let (pool, mut outcomes) = pool_with(factory, 4);
    pool.initialize().unwrap();
    assert_eq!(pool.occupancy(), (4, 0));

    let _ = pool.post(0..40, false);
    let monitor = tokio::spawn({
        let pool = pool.clone();
        async move {
            let mut max_busy = 0;
            for _ in 0..200 {
                let (available, busy) = pool.occupancy();
                assert_eq!(available + busy, 4);
                max_busy = max_busy.max(busy);
                delay(Duration::from_millis(1)).await;
            }
            max_busy
        }
    });

    assert_eq!(values(collect(&mut outcomes, 40).await), (0..40).collect::<Vec<_>>());
    assert!(monitor.await.unwrap() <= 4);
    assert_eq!(pool.occupancy(), (4, 0));
    pool.stop().await;
}

#[tokio::test]
async fn pause_holds_back_dispatch_until_resume() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (pool, mut outcomes) = pool_with(recording(&seen, Duration::from_millis(50)), 2);
    pool.initialize().unwrap();

    let _ = pool.post(1..=6, false);
    delay(Duration::from_millis(10)).await;
    pool.pause();
    assert!(!pool.is_active());

    // Items already in flight still settle
    assert_eq!(values(collect(&mut outcomes, 2).await), vec![1, 2]);
    delay(Duration::from_millis(100)).await;
    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(pool.backlog_len(), 4);
    assert_eq!(pool.occupancy(), (2, 0));
    assert!(outcomes.try_recv().is_err());

    pool.resume();
    assert_eq!(values(collect(&mut outcomes, 4).await), vec![3, 4, 5, 6]);
    pool.stop().await;
}

#[tokio::test]
async fn stop_waits_for_busy_workers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (pool, mut outcomes) = pool_with(recording(&seen, Duration::from_millis(50)), 2);
    pool.initialize().unwrap();

    let _ = pool.post(1..=5, false);
    delay(Duration::from_millis(10)).await;
    timeout(PATIENCE, pool.stop()).await.unwrap();

    // Both busy workers settled before stop returned, the rest stays queued
    let settled: Vec<_> = std::iter::from_fn(|| outcomes.try_recv().ok()).collect();
    assert_eq!(values(settled), vec![1, 2]);
    assert_eq!(pool.occupancy(), (0, 0));
    assert_eq!(pool.backlog_len(), 3);

    // A stopped pool can be brought up again
    pool.initialize().unwrap();
    assert_eq!(values(collect(&mut outcomes, 3).await), vec![3, 4, 5]);
    pool.stop().await;
}

#[tokio::test]
async fn failing_item_does_not_stop_dispatch() {
    let factory = script_factory(|_| {
        |request: u32| {
            if request % 3 == 0 {
                Reply::Error(format!("{request} is divisible by three"))
            } else {
                Reply::Value(request)
            }
        }
    });
    let (pool, mut outcomes) = pool_with(factory, 1);
    pool.initialize().unwrap();

    let _ = pool.post(1..=7, false);
    let collected = collect(&mut outcomes, 7).await;

    let failures: Vec<&Error> = collected.iter().filter_map(|o| o.as_ref().err()).collect();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|e| matches!(e, Error::Process(..))));
    let succeeded: Vec<u32> = collected.into_iter().filter_map(|o| o.ok().flatten()).collect();
    assert_eq!(succeeded, vec![1, 2, 4, 5, 7]);
    pool.stop().await;
}

#[tokio::test]
async fn exited_worker_is_respawned() {
    let factory = script_factory(|_| {
        |request: u32| match request {
            0 => Reply::Exit(ExitStatus::from(2)),
            request => Reply::Value(request),
        }
    });
    let (pool, mut outcomes) = pool_with(factory, 1);
    pool.initialize().unwrap();

    let _ = pool.post([1, 0, 2, 0, 3], false);
    let collected = collect(&mut outcomes, 5).await;

    assert!(matches!(
        collected[1],
        Err(Error::AbnormalExit(_, Some(status))) if status.code() == 2
    ));
    assert!(matches!(collected[3], Err(Error::AbnormalExit(..))));
    let succeeded: Vec<u32> = collected.into_iter().filter_map(|o| o.ok().flatten()).collect();
    assert_eq!(succeeded, vec![1, 2, 3]);
    pool.stop().await;
}

#[tokio::test]
async fn items_posted_before_initialize_wait_for_it() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (pool, mut outcomes) = pool_with(recording(&seen, Duration::ZERO), 2);

    let _ = pool.post([7, 9], false);
    delay(Duration::from_millis(20)).await;
    assert_eq!(pool.backlog_len(), 2);
    assert!(seen.lock().unwrap().is_empty());

    pool.initialize().unwrap();
    assert!(matches!(pool.initialize(), Err(Error::AlreadyInitialized)));
    assert_eq!(values(collect(&mut outcomes, 2).await), vec![7, 9]);
    pool.stop().await;
}

#[tokio::test]
async fn awaiting_drain_of_idle_pool_completes_immediately() {
    let (pool, _outcomes) = pool_with(EchoScript::factory(Duration::ZERO, Duration::ZERO), 2);
    pool.initialize().unwrap();

    timeout(Duration::from_millis(100), pool.post(Vec::new(), true))
        .await
        .unwrap();
    pool.stop().await;
}

#[tokio::test]
async fn stop_terminates_every_worker() {
    let (pool, mut outcomes) = pool_with(EchoScript::factory(Duration::ZERO, Duration::ZERO), 3);
    pool.initialize().unwrap();
    let _ = pool.post(1..=6, false);
    collect(&mut outcomes, 6).await;

    let channels = pool.channels();
    assert_eq!(channels.len(), 3);
    pool.stop().await;

    assert!(channels
        .iter()
        .all(|channel| channel.state() == ChannelState::Terminated));
    assert!(pool.channels().is_empty());
}

#[tokio::test]
async fn inverted_exit_policy_reports_failing_exit_as_empty_success() {
    flotilla_logger::try_init(LevelFilter::Warn);
    let factory = script_factory(|_| {
        |request: u32| match request {
            0 => Reply::Exit(ExitStatus::from(2)),
            request => Reply::Value(request),
        }
    });
    let (sender, mut outcomes) = unbounded_channel();
    let pool = Builder::new(factory, 1)
        .name_prefix("test")
        .exit_policy(ExitPolicy::Inverted)
        .build(move |outcome| {
            let _ = sender.send(outcome);
        });
    pool.initialize().unwrap();
    let before = pool.channels();

    let _ = pool.post([1, 0, 2], false);
    let collected = collect(&mut outcomes, 3).await;

    assert!(matches!(collected[0], Ok(Some(1))));
    assert!(matches!(collected[1], Ok(None)));
    assert!(matches!(collected[2], Ok(Some(2))));

    // The exited worker was replaced in the same slot
    let after = pool.channels();
    assert_eq!(before[0].state(), ChannelState::Exited);
    assert!(!Arc::ptr_eq(&before[0], &after[0]));
    assert_eq!(after[0].state(), ChannelState::Idle);
    pool.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_returns_after_completion_handlers() {
    flotilla_logger::try_init(LevelFilter::Warn);
    let handled = Arc::new(AtomicUsize::new(0));
    let pool = Builder::new(EchoScript::factory(Duration::ZERO, Duration::ZERO), 2)
        .name_prefix("test")
        .build({
            let handled = Arc::clone(&handled);
            move |_: Result<Option<u32>>| {
                thread::sleep(Duration::from_millis(100));
                handled.fetch_add(1, Ordering::SeqCst);
            }
        });
    pool.initialize().unwrap();

    let _ = pool.post([1, 2], false);
    timeout(PATIENCE, pool.stop()).await.unwrap();

    assert_eq!(handled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn panicking_handler_does_not_stall_backlog() {
    flotilla_logger::try_init(LevelFilter::Warn);
    let (sender, mut outcomes) = unbounded_channel();
    let pool = Builder::new(EchoScript::factory(Duration::ZERO, Duration::ZERO), 1)
        .name_prefix("test")
        .build(move |outcome: Result<Option<u32>>| {
            if matches!(outcome, Ok(Some(1))) {
                panic!("completion handler failure");
            }
            let _ = sender.send(outcome);
        });
    pool.initialize().unwrap();

    timeout(PATIENCE, pool.post([1, 2, 3], true)).await.unwrap();
    assert_eq!(values(collect(&mut outcomes, 2).await), vec![2, 3]);
    timeout(PATIENCE, pool.stop()).await.unwrap();
}
