// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Console logger for flotilla applications.
//!
//! Installs a [`Log`] implementation that writes one coloured line per record to
//! `stdout`. Libraries log through `flotilla-log`; only binaries and tests call [`init`].

use flotilla_log::{LevelFilter, Log, Metadata, Record};
use std::time::SystemTime;
use std::{io, process};

pub mod fmt;

const ENV_RUST_LOG: &str = "RUST_LOG";

/// Initialize the logger.
///
/// A valid level passed as `RUST_LOG` environment variable overrides `level`.
/// Enable output to `stdout` via `console`.
pub fn init(level: LevelFilter, console: bool) {
    let logger = Logger::new(console);

    // Set the maximum log level the log subsystem will forward to this logger impl.
    flotilla_log::set_max_level(level_from_env().unwrap_or(level));
    // Set the logger in the global subsystem.
    flotilla_log::set_boxed_logger(Box::new(logger)).expect("failed to set logger")
}

/// Initialize the logger unless one is installed already.
///
/// Meant for tests, where several test functions race to install a logger.
pub fn try_init(level: LevelFilter) {
    if flotilla_log::set_boxed_logger(Box::new(Logger::new(true))).is_ok() {
        flotilla_log::set_max_level(level_from_env().unwrap_or(level));
    }
}

/// The flotilla logger.
#[derive(Debug)]
pub struct Logger {
    console: bool,
}

impl Logger {
    /// Create a new logger.
    pub fn new(console: bool) -> Self {
        Self { console }
    }
}

impl Log for Logger {
    /// Check if a log message with the specified metadata would be logged.
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= flotilla_log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.console || !self.enabled(record.metadata()) {
            return;
        }

        let args = record.args().to_string();
        let record = fmt::Record {
            timestamp: SystemTime::now(),
            level: record.level(),
            target: record.target(),
            file: record.file(),
            line: record.line(),
            tgid: process::id(),
            tid: thread_id(),
            args: &args,
        };

        // A broken stdout must not take the application down.
        let _ = fmt::format(&record, io::stdout().lock());
    }

    fn flush(&self) {}
}

/// Try to parse the log level from the environment variable `RUST_LOG`.
fn level_from_env() -> Option<LevelFilter> {
    std::env::var(ENV_RUST_LOG).ok().and_then(|s| {
        flotilla_log::parse_level_filter(&s).or_else(|| {
            eprintln!("Failed to parse log level from `RUST_LOG={s}`");
            None
        })
    })
}

/// Get the current thread id
fn thread_id() -> u32 {
    // Safety: gettid(2) says this never fails
    unsafe { libc::gettid() as u32 }
}
