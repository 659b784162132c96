// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Logging front for the flotilla crates.
//!
//! Re-exports the `log` facade so that libraries log through one crate and the
//! application decides which logger implementation (e.g. `flotilla-logger`) is installed.
//!
//! ```
//! use flotilla_log::{debug, info};
//!
//! info!("pool initialized with {} workers", 4);
//! debug!(target: "flotilla::runner", "unit {} claimed", 1);
//! ```

pub use log::*;

/// Parse a level filter from a string such as `info` or `DEBUG`.
///
/// Returns `None` for unknown names instead of an error, so callers can fall back to
/// a default level.
pub fn parse_level_filter(value: &str) -> Option<LevelFilter> {
    value.trim().parse().ok()
}
