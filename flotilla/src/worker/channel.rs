// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

use super::script::ScriptFactory;
use super::thread::{self, Command, Event};
use super::{ExitStatus, WorkerId};
use crate::error::{Error, Result};
use flotilla_log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

/// How a worker context ending while a request is pending is reported
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Any exit while a request is pending is an [`Error::AbnormalExit`]
    #[default]
    Uniform,
    /// A clean exit while pending is an [`Error::AbnormalExit`], while any other exit
    /// status settles the request successfully without a payload.
    Inverted,
}

/// Lifecycle state of a [`WorkerChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Busy,
    /// The worker reported an error for the last request. Needs [`WorkerChannel::recover`].
    Errored,
    /// The worker context has ended on its own
    Exited,
    Terminated,
}

impl ChannelState {
    fn describe(self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Busy => "busy",
            ChannelState::Errored => "errored",
            ChannelState::Exited => "exited",
            ChannelState::Terminated => "terminated",
        }
    }
}

/// Parameters for spawning the worker context behind a channel
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Prefix of the worker thread name
    pub name_prefix: String,
    /// Worker thread stack size
    pub stack_size: Option<usize>,
    pub exit_policy: ExitPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name_prefix: "flotilla".to_string(),
            stack_size: None,
            exit_policy: ExitPolicy::default(),
        }
    }
}

/// Channel to a single isolated worker context.
///
/// At most one request is outstanding at any time. Issuing a second request while one
/// is pending is rejected with [`Error::Busy`].
pub struct WorkerChannel<Req, Resp> {
    id: WorkerId,
    commands: mpsc::Sender<Command<Req>>,
    // Holding this lock is what makes a request outstanding
    events: tokio::sync::Mutex<UnboundedReceiver<Event<Resp>>>,
    state: Mutex<ChannelState>,
    terminated: watch::Sender<bool>,
    next_seq: AtomicU64,
    exit_policy: ExitPolicy,
}

impl<Req, Resp> WorkerChannel<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create a new channel. This spawns the worker context thread.
    pub fn spawn(
        id: WorkerId,
        factory: ScriptFactory<Req, Resp>,
        config: &ChannelConfig,
    ) -> Result<Self> {
        let endpoints = thread::spawn(id, &config.name_prefix, config.stack_size, factory)
            .map_err(|e| Error::Io((e, "failed to spawn worker thread")))?;
        debug!("Spawned worker {id}");

        Ok(Self {
            id,
            commands: endpoints.commands,
            events: tokio::sync::Mutex::new(endpoints.events),
            state: Mutex::new(ChannelState::Idle),
            terminated: watch::Sender::new(false),
            next_seq: AtomicU64::new(0),
            exit_policy: config.exit_policy,
        })
    }

    /// Spawn a channel, issue a single request, terminate the channel and return the
    /// result of the request
    pub async fn execute_once(
        factory: ScriptFactory<Req, Resp>,
        request: Req,
    ) -> Result<Option<Resp>> {
        let channel = Self::spawn(WorkerId::from(0), factory, &ChannelConfig::default())?;
        let result = channel.issue(request).await;
        channel.terminate();
        result
    }

    /// Send `request` to the worker and wait for its single reply.
    ///
    /// Resolves to `Ok(Some(reply))` on success. `Ok(None)` is only produced under
    /// [`ExitPolicy::Inverted`] for a worker that exits with a non-clean status.
    pub async fn issue(&self, request: Req) -> Result<Option<Resp>> {
        let mut events = self.events.try_lock().map_err(|_| Error::Busy(self.id))?;

        // Drop leftovers of abandoned requests, pick up exits that happened while idle
        loop {
            match events.try_recv() {
                Ok(Event::Exit(status)) => {
                    debug!("Worker {} exited with {status} while idle", self.id);
                    self.mark_exited();
                }
                Ok(_) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_exited();
                    break;
                }
            }
        }

        let _outstanding = Outstanding::enter(&self.state)
            .map_err(|state| Error::Unavailable(self.id, state.describe()))?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        trace!("Issuing request #{seq} on worker {}", self.id);
        // A failed send means the worker context is gone. Its exit event is still
        // queued, so it is handled below like any exit while pending.
        let _ = self.commands.send(Command::Request(seq, request));

        let mut terminated = self.terminated.subscribe();
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = terminated.wait_for(|terminated| *terminated) => {
                    return Err(Error::Terminated(self.id));
                }
            };

            match event {
                Some(Event::Reply(reply_seq, value)) if reply_seq == seq => {
                    return Ok(Some(value));
                }
                Some(Event::Error(reply_seq, message)) if reply_seq == seq => {
                    self.set_state(ChannelState::Errored);
                    return Err(Error::Process(self.id, message));
                }
                Some(Event::Reply(..)) | Some(Event::Error(..)) => {
                    trace!("Dropping stale reply on worker {}", self.id);
                }
                Some(Event::Exit(status)) => {
                    self.mark_exited();
                    return self.exit_while_pending(Some(status));
                }
                None => {
                    self.mark_exited();
                    return self.exit_while_pending(None);
                }
            }
        }
    }

    fn exit_while_pending(&self, status: Option<ExitStatus>) -> Result<Option<Resp>> {
        debug!(
            "Worker {} ended while a request was pending ({status:?})",
            self.id
        );
        match (self.exit_policy, status) {
            (ExitPolicy::Inverted, Some(status)) if !status.is_clean() => Ok(None),
            _ => Err(Error::AbnormalExit(self.id, status)),
        }
    }
}

impl<Req, Resp> WorkerChannel<Req, Resp> {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().expect("channel state lock poisoned") = state;
    }

    fn mark_exited(&self) {
        let mut state = self.state.lock().expect("channel state lock poisoned");
        if *state != ChannelState::Terminated {
            *state = ChannelState::Exited;
        }
    }

    /// Bring an errored channel back into service
    pub fn recover(&self) -> Result<()> {
        let mut state = self.state.lock().expect("channel state lock poisoned");
        match *state {
            ChannelState::Idle => Ok(()),
            ChannelState::Errored => {
                debug!("Recovering worker {}", self.id);
                *state = ChannelState::Idle;
                Ok(())
            }
            ChannelState::Busy => Err(Error::Busy(self.id)),
            other => Err(Error::Unavailable(self.id, other.describe())),
        }
    }

    /// End the worker context.
    ///
    /// A pending request is discarded: its reply is never delivered and the issuer is
    /// released with [`Error::Terminated`]. A script in the middle of handling a request
    /// finishes that request before the thread ends.
    pub fn terminate(&self) {
        debug!("Terminating worker {}", self.id);
        self.set_state(ChannelState::Terminated);
        self.terminated.send_replace(true);
        // The worker context may have ended on its own already
        let _ = self.commands.send(Command::Terminate);
    }
}

/// Marks a channel busy for the lifetime of one request.
///
/// Returns the channel to idle when dropped, unless the request moved it into another
/// state. This also covers issuers that abandon the request future.
struct Outstanding<'a> {
    state: &'a Mutex<ChannelState>,
}

impl<'a> Outstanding<'a> {
    fn enter(state: &'a Mutex<ChannelState>) -> std::result::Result<Self, ChannelState> {
        let mut current = state.lock().expect("channel state lock poisoned");
        match *current {
            ChannelState::Idle => {
                *current = ChannelState::Busy;
                Ok(Self { state })
            }
            other => Err(other),
        }
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        let mut current = self.state.lock().expect("channel state lock poisoned");
        if *current == ChannelState::Busy {
            *current = ChannelState::Idle;
        }
    }
}
