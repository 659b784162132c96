// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Worker context thread

use super::script::{Reply, ScriptFactory};
use super::{ExitStatus, WorkerId};
use flotilla_log::{debug, trace};
use std::io;
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Message from the coordinator to a worker context
pub(crate) enum Command<Req> {
    Request(u64, Req),
    Terminate,
}

/// Message from a worker context to the coordinator
#[derive(Debug)]
pub(crate) enum Event<Resp> {
    Reply(u64, Resp),
    Error(u64, String),
    Exit(ExitStatus),
}

/// Both ends the coordinator keeps of a spawned worker context
pub(crate) struct Endpoints<Req, Resp> {
    pub commands: mpsc::Sender<Command<Req>>,
    pub events: UnboundedReceiver<Event<Resp>>,
}

/// Spawn a new worker context thread running the script built by `factory`.
///
/// The thread is detached. It ends once it receives a terminate command, once the
/// coordinator drops its command sender, or when the script asks to exit.
pub(crate) fn spawn<Req, Resp>(
    id: WorkerId,
    name_prefix: &str,
    stack_size: Option<usize>,
    factory: ScriptFactory<Req, Resp>,
) -> io::Result<Endpoints<Req, Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    let (command_sender, command_receiver) = mpsc::channel();
    let (event_sender, event_receiver) = unbounded_channel();

    let thread_name = format!("{name_prefix}-{id}").to_lowercase();
    let mut builder = thread::Builder::new().name(thread_name);
    if let Some(stack_size) = stack_size {
        builder = builder.stack_size(stack_size);
    }
    builder.spawn(move || run(id, factory, command_receiver, event_sender))?;

    Ok(Endpoints {
        commands: command_sender,
        events: event_receiver,
    })
}

/// Reports the exit of the worker context, including exits by panic
struct ExitReporter<Resp> {
    id: WorkerId,
    status: ExitStatus,
    events: UnboundedSender<Event<Resp>>,
}

impl<Resp> Drop for ExitReporter<Resp> {
    fn drop(&mut self) {
        let status = if thread::panicking() {
            ExitStatus::PANIC
        } else {
            self.status
        };
        debug!("Worker {} exiting with {status}", self.id);
        // The coordinator may be gone already
        let _ = self.events.send(Event::Exit(status));
    }
}

/// Worker context main function
fn run<Req, Resp>(
    id: WorkerId,
    factory: ScriptFactory<Req, Resp>,
    commands: mpsc::Receiver<Command<Req>>,
    events: UnboundedSender<Event<Resp>>,
) {
    let mut reporter = ExitReporter {
        id,
        status: ExitStatus::CLEAN,
        events: events.clone(),
    };

    // Build the script within this thread
    let mut script = factory(id);

    // Process requests until told otherwise. A closed command channel means the
    // coordinator dropped this worker's channel.
    while let Ok(command) = commands.recv() {
        let (seq, request) = match command {
            Command::Request(seq, request) => (seq, request),
            Command::Terminate => break,
        };

        trace!("Worker {id} handling request #{seq}");
        let event = match script.handle(request) {
            Reply::Value(value) => Event::Reply(seq, value),
            Reply::Error(message) => Event::Error(seq, message),
            Reply::Exit(status) => {
                reporter.status = status;
                break;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
}
