// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! flotilla Error implementation

use crate::worker::{ExitStatus, WorkerId};

/// flotilla Error type
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The worker context reported an error while a request was pending
    Process(WorkerId, String),
    /// The worker context ended while a request was pending
    AbnormalExit(WorkerId, Option<ExitStatus>),
    /// A caller supplied handler failed
    Handler(String),
    /// A request was issued on a channel that already has one outstanding
    Busy(WorkerId),
    /// The channel cannot take requests in its current state
    Unavailable(WorkerId, &'static str),
    /// The channel was terminated while a request was pending
    Terminated(WorkerId),
    /// The pool has been initialized already
    AlreadyInitialized,
    Io((std::io::Error, &'static str)),
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io((e, _)) => Some(e),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Process(id, message) => write!(f, "Process error in worker {id}: {message}"),
            Error::AbnormalExit(id, Some(status)) => {
                write!(f, "Worker {id} exited with {status} while a request was pending")
            }
            Error::AbnormalExit(id, None) => {
                write!(f, "Worker {id} vanished while a request was pending")
            }
            Error::Handler(message) => write!(f, "Handler failure: {message}"),
            Error::Busy(id) => write!(f, "Worker {id} already has a pending request"),
            Error::Unavailable(id, state) => write!(f, "Worker {id} is {state}"),
            Error::Terminated(id) => write!(f, "Worker {id} terminated with a pending request"),
            Error::AlreadyInitialized => write!(f, "Worker pool is already initialized"),
            Error::Io((e, description)) => write!(f, "Io error: {}, {}", description, e),
        }
    }
}

impl Error {
    /// Whether this error originates from the worker context rather than from misuse
    /// of the channel
    pub fn is_worker_failure(&self) -> bool {
        matches!(self, Error::Process(..) | Error::AbnormalExit(..))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
