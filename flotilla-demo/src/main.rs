// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Drive a worker pool and a bounded runner with stand-in work

use anyhow::Error;
use argh::FromArgs;
use flotilla::prelude::{configuration, worker, EchoScript, FinishPolicy};
use flotilla_log::{error, info, LevelFilter};
use rand::Rng;
use std::time::Duration;
use tokio::runtime;

#[derive(FromArgs)]
#[argh(help_triggers("-h", "--help", "help"))]
/// Demo arguments
struct Args {
    #[argh(description = "number of items posted to the worker pool")]
    #[argh(option, short = 'i', default = "20")]
    items: u32,

    #[argh(description = "concurrency of pool and runner")]
    #[argh(option, short = 'c', default = "4")]
    concurrency: usize,

    #[argh(description = "number of units processed by the runner")]
    #[argh(option, short = 'n', default = "30")]
    count: usize,

    #[argh(description = "probability of a runner unit failing")]
    #[argh(option, short = 'f', default = "0.1")]
    fail_rate: f64,

    #[argh(description = "retry backoff of the runner in milliseconds")]
    #[argh(option, short = 'b', default = "500")]
    backoff: u64,

    #[argh(description = "log level")]
    #[argh(option, short = 'l')]
    log_level: Option<LevelFilter>,
}

fn main() -> Result<(), Error> {
    let args: Args = argh::from_env();

    flotilla_logger::init(args.log_level.unwrap_or(LevelFilter::Info), true);

    runtime::Builder::new_current_thread()
        .enable_time()
        .build()?
        .block_on(run(args))
}

async fn run(args: Args) -> Result<(), Error> {
    run_pool(&args).await?;
    run_runner(&args).await;
    Ok(())
}

/// Echo items through a pool of worker threads
async fn run_pool(args: &Args) -> Result<(), Error> {
    let factory = EchoScript::factory(Duration::from_millis(10), Duration::from_millis(100));
    let pool = configuration::worker_pool::Builder::new(factory, args.concurrency)
        .name_prefix("demo")
        .build(|outcome: flotilla::error::Result<Option<u32>>| match outcome {
            Ok(Some(item)) => info!("Item {item} done"),
            Ok(None) => info!("Item done without reply"),
            Err(e) => error!("Item failed: {e}"),
        });

    pool.initialize()?;
    pool.post(1..=args.items, true).await;
    pool.stop().await;
    Ok(())
}

/// Run units with random duration and random failures on a bounded runner
async fn run_runner(args: &Args) {
    let fail_rate = args.fail_rate.clamp(0.0, 1.0);
    let runner = configuration::runner::Builder::new("demo", args.count, args.concurrency)
        .backoff(Duration::from_millis(args.backoff))
        .finish_policy(FinishPolicy::Drained)
        .start(move |unit| async move {
            let (work, fails) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(10..100), rng.gen_bool(fail_rate))
            };
            worker::delay(Duration::from_millis(work)).await;
            if fails {
                Err(format!("unit {unit} hit a simulated failure"))
            } else {
                Ok(())
            }
        });

    runner.wait_finish().await;
    info!("Runner processed {} units", runner.cursor());
}
