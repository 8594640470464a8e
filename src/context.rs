//! Contexts on both sides of the protocol boundary.
//!
//! [`JobContext`] is what the caller hands to a handler: the description and
//! the inbound control stream. [`RunContext`] is what the engine builds once
//! per run and hands to the job body: description, logger, consumable input
//! and the channel factory. Immutable after construction except for the
//! input source, which is fed by inbound `Input` messages.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use pin_project_lite::pin_project;

use crate::channel::{ChannelAlreadyOpen, ChannelHandle, ChannelManager};
use crate::message::{InboundMessage, JobDescription, LogEntry, LogLevel, Value};

/// Caller-side context for one run: job metadata plus the inbound source.
pub struct JobContext {
    pub description: JobDescription,
    /// Ordered control messages, delivered to the engine in delivery order.
    pub inbound: BoxStream<'static, InboundMessage>,
}

impl JobContext {
    pub fn new<St>(description: JobDescription, inbound: St) -> Self
    where
        St: futures::Stream<Item = InboundMessage> + Send + 'static,
    {
        Self {
            description,
            inbound: Box::pin(inbound),
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Input values streamed to the run via inbound `Input` messages.
    ///
    /// Restartable from now: values forwarded before the body starts reading
    /// are buffered, nothing is replayed from an earlier run.
    #[derive(Debug)]
    pub struct Input {
        #[pin]
        receiver: mpsc::UnboundedReceiver<Value>,
    }
}

impl Input {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Value>) -> Self {
        Self { receiver }
    }

    fn closed() -> Self {
        let (_, receiver) = mpsc::unbounded();
        Self { receiver }
    }
}

impl futures::Stream for Input {
    type Item = Value;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let this = self.project();
        this.receiver.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.receiver.size_hint()
    }
}

/// Structured log sink exposed to the job body.
///
/// Entries are forwarded as `Log` messages on the primary outbound stream;
/// after the run's terminal message they are dropped.
#[derive(Clone)]
pub struct Logger {
    manager: Arc<ChannelManager>,
}

impl Logger {
    pub fn entry(&self, entry: LogEntry) {
        self.manager.log(entry);
    }

    pub fn debug<S: Into<String>>(&self, message: S) {
        self.entry(LogEntry::new(LogLevel::Debug, message));
    }

    pub fn info<S: Into<String>>(&self, message: S) {
        self.entry(LogEntry::new(LogLevel::Info, message));
    }

    pub fn warn<S: Into<String>>(&self, message: S) {
        self.entry(LogEntry::new(LogLevel::Warn, message));
    }

    pub fn error<S: Into<String>>(&self, message: S) {
        self.entry(LogEntry::new(LogLevel::Error, message));
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Logger")
    }
}

/// Body-side context, built once per run.
pub struct RunContext {
    description: JobDescription,
    input: Input,
    logger: Logger,
    manager: Arc<ChannelManager>,
}

impl RunContext {
    pub(crate) fn new(
        description: JobDescription,
        input: Input,
        manager: Arc<ChannelManager>,
    ) -> Self {
        Self {
            description,
            input,
            logger: Logger {
                manager: Arc::clone(&manager),
            },
            manager,
        }
    }

    /// The run's description, opaque passthrough from the caller.
    pub fn description(&self) -> &JobDescription {
        &self.description
    }

    /// The structured log sink for this run.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Take the input sequence out of the context.
    ///
    /// The sequence can be taken once; afterwards the context holds an
    /// already-terminated replacement.
    pub fn take_input(&mut self) -> Input {
        std::mem::replace(&mut self.input, Input::closed())
    }

    /// Open the named side channel.
    ///
    /// Fails if `name` is currently open for this run. A name released by
    /// completion or error may be reopened as a fresh channel instance.
    pub fn create_channel<S>(&self, name: S) -> Result<ChannelHandle, ChannelAlreadyOpen>
    where
        S: Into<String>,
    {
        self.manager.create(name.into())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
