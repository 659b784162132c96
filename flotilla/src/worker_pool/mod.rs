// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

mod pool;
#[cfg(test)]
mod tests;

pub use pool::{CompletionHandler, WorkerPool};
