//! Named side channels opened by a running job.
//!
//! One owner, one table: the [`ChannelManager`] exclusively holds the
//! open-channel set and the side half of the outbound sink. Handles call
//! into it; nothing else touches the table.
//!
//! Why:
//! - A name is unique among *currently open* channels; destroying a channel
//!   frees the name for a fresh instance.
//! - Handles from a destroyed instance must stay inert even if the name was
//!   reopened, so the table maps name to a generation counter and a handle
//!   only acts while its generation is current.
//! - Signaling error/completion consumes the handle to forbid double
//!   teardown by type.

use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::mpsc;

use crate::engine::Error;
use crate::message::{JobDescription, LogEntry, OutboundKind, OutboundMessage, Value};

/// Attempted to create a channel whose name is currently open.
///
/// Raised synchronously to the job body at the point of creation; this is a
/// programming error in the body, never an outbound protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAlreadyOpen {
    name: String,
}

impl ChannelAlreadyOpen {
    /// Name of the channel that was already open.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ChannelAlreadyOpen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel \"{}\" is already open", self.name)
    }
}

impl std::error::Error for ChannelAlreadyOpen {}

struct Inner {
    /// Side half of the run's outbound sink. `None` once the run reached its
    /// terminal message; every emission checks this first.
    sink: Option<mpsc::UnboundedSender<Result<OutboundMessage, Error>>>,
    /// Currently open names, each with the generation that owns it.
    open: std::collections::BTreeMap<String, u64>,
    next_generation: u64,
}

/// Owner of the open-channel table for one job run.
///
/// Also carries the logger traffic so that "nothing after the terminal
/// message" holds for `Log` messages too.
pub(crate) struct ChannelManager {
    description: JobDescription,
    inner: Mutex<Inner>,
}

impl ChannelManager {
    pub(crate) fn new(
        description: JobDescription,
        sink: mpsc::UnboundedSender<Result<OutboundMessage, Error>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            description,
            inner: Mutex::new(Inner {
                sink: Some(sink),
                open: std::collections::BTreeMap::new(),
                next_generation: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, inner: &Inner, kind: OutboundKind) {
        if let Some(sink) = &inner.sink {
            let _ = sink.unbounded_send(Ok(OutboundMessage {
                description: self.description.clone(),
                kind,
            }));
        }
    }

    /// Register `name` and hand out the handle the body pushes through.
    pub(crate) fn create(
        self: &Arc<Self>,
        name: String,
    ) -> Result<ChannelHandle, ChannelAlreadyOpen> {
        let mut inner = self.lock();
        if inner.open.contains_key(&name) {
            return Err(ChannelAlreadyOpen { name });
        }
        let generation = inner.next_generation;
        inner.next_generation += 1;
        inner.open.insert(name.clone(), generation);

        Ok(ChannelHandle {
            name,
            generation,
            manager: Arc::clone(self),
        })
    }

    pub(crate) fn log(&self, entry: LogEntry) {
        let inner = self.lock();
        self.emit(&inner, OutboundKind::Log { entry });
    }

    fn push(&self, name: &str, generation: u64, message: Value) {
        let inner = self.lock();
        // A stale handle (its instance was torn down, possibly reopened under
        // the same name) must not leak into the current instance.
        if inner.open.get(name) != Some(&generation) {
            tracing::debug!(channel = name, "dropped message for closed channel");
            return;
        }
        self.emit(
            &inner,
            OutboundKind::ChannelMessage {
                name: name.to_string(),
                message,
            },
        );
    }

    fn fail(&self, name: &str, generation: u64, error: Value) {
        let mut inner = self.lock();
        if inner.open.get(name) != Some(&generation) {
            return;
        }
        inner.open.remove(name);
        self.emit(
            &inner,
            OutboundKind::ChannelError {
                name: name.to_string(),
                error,
            },
        );
    }

    fn finish(&self, name: &str, generation: u64) {
        let mut inner = self.lock();
        if inner.open.get(name) != Some(&generation) {
            return;
        }
        inner.open.remove(name);
        self.emit(
            &inner,
            OutboundKind::ChannelComplete {
                name: name.to_string(),
            },
        );
    }

    /// Force-complete every open channel, then close the side sink.
    ///
    /// Called when the run terminates via `Stop` or natural completion; the
    /// `ChannelComplete` messages land before the engine's `End`.
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        let open = std::mem::take(&mut inner.open);
        for name in open.into_keys() {
            self.emit(&inner, OutboundKind::ChannelComplete { name });
        }
        inner.sink = None;
    }

    /// Tear down without emitting anything.
    ///
    /// Used on run failure: the terminal `Err` item must be the last thing
    /// on the stream, so open channels are cleared silently.
    pub(crate) fn abort(&self) {
        let mut inner = self.lock();
        inner.open.clear();
        inner.sink = None;
    }
}

/// Handle through which the job body drives one channel instance.
///
/// Values pushed are forwarded as `ChannelMessage` in push order. Error and
/// completion consume the handle; the name becomes reusable afterwards.
pub struct ChannelHandle {
    name: String,
    generation: u64,
    manager: Arc<ChannelManager>,
}

impl ChannelHandle {
    /// Channel name this handle owns.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Push one message. Silently dropped if the channel or the run is
    /// already closed; messages already handed to the sink are final.
    pub fn send(&self, message: Value) {
        self.manager.push(&self.name, self.generation, message);
    }

    /// Signal failure of this channel. Local to the channel: the run keeps
    /// going and the name may be reopened.
    pub fn error(self, error: Value) {
        self.manager.fail(&self.name, self.generation, error);
    }

    /// Signal completion of this channel.
    pub fn complete(self) {
        self.manager.finish(&self.name, self.generation);
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .finish()
    }
}
