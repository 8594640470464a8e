//! Job handler protocol engine.
//!
//! One cooperative task per run: the drive loop merges inbound control
//! messages, the body's own production and channel traffic into a single
//! outbound queue, so the observed sequence never reorders messages from
//! one source. Nothing is spawned; the run makes progress only while the
//! returned stream is polled, which is also what makes the start lazy. A
//! fresh call to [`JobHandler::handle`] is a fresh run.

use std::sync::Arc;

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt as _;

use crate::channel::ChannelManager;
use crate::context::{Input, JobContext, RunContext};
use crate::message::{InboundMessage, JobDescription, OutboundKind, OutboundMessage, Value};
use crate::{BoxError, Execution, JobBody};

/// The complete externally observable behavior of one run.
///
/// Normal completion ends with `Ok(End)`; a run failure ends with a single
/// `Err` item instead, after which the stream is done.
pub type OutboundStream = BoxStream<'static, Result<OutboundMessage, Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
/// Categorization of terminal run failures.
pub enum ErrorKind {
    /// The job body failed: a synchronous error, a rejected deferred value
    /// or an errored stream.
    Body,
    /// A lazy handler factory failed to resolve.
    Factory,
}

#[derive(Debug)]
/// Terminal failure carried by the outbound stream in place of `End`.
pub struct Error {
    kind: ErrorKind,
    inner: BoxError,
}

impl Error {
    pub(crate) fn body(inner: BoxError) -> Self {
        Self {
            kind: ErrorKind::Body,
            inner,
        }
    }

    pub(crate) fn factory(inner: BoxError) -> Self {
        Self {
            kind: ErrorKind::Factory,
            inner,
        }
    }

    /// Return the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// Contract between the scheduler and a runnable job.
///
/// `handle` builds the run without starting it; the first poll of the
/// returned stream starts the job. A terminated run never restarts; call
/// `handle` again for a fresh run instance.
pub trait JobHandler: Send + Sync {
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream;
}

impl<H> JobHandler for Box<H>
where
    H: JobHandler + ?Sized,
{
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream {
        (**self).handle(argument, context)
    }
}

impl<H> JobHandler for Arc<H>
where
    H: JobHandler + ?Sized,
{
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream {
        (**self).handle(argument, context)
    }
}

/// Adapt a [`JobBody`] into a [`JobHandler`].
pub fn handler<B, M>(body: B) -> FnHandler<B, M>
where
    B: JobBody<M>,
{
    FnHandler {
        body,
        marker: std::marker::PhantomData,
    }
}

/// [`JobHandler`] backed by a plain function or closure.
///
/// The body is cloned per run, mirroring "a new subscription creates a
/// fresh run instance".
pub struct FnHandler<B, M> {
    body: B,
    marker: std::marker::PhantomData<fn() -> M>,
}

impl<B, M> JobHandler for FnHandler<B, M>
where
    B: JobBody<M>,
    M: 'static,
{
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream {
        let body = self.body.clone();
        let (sink, messages) = mpsc::unbounded();
        // The driver emits nothing itself; it only writes into `sink`.
        // Selecting it alongside the receiver keeps the run polling-driven
        // and closes the stream once the driver returned and the queue
        // drained.
        let driver = drive(body, argument, context, sink);
        let driver = futures::stream::once(driver)
            .filter_map(|()| futures::future::ready(None::<Result<OutboundMessage, Error>>));
        futures::stream::select(messages, driver).boxed()
    }
}

/// Writes protocol messages for one run, stamping the correlation token.
struct Emitter {
    description: JobDescription,
    sink: mpsc::UnboundedSender<Result<OutboundMessage, Error>>,
}

impl Emitter {
    fn send(&self, kind: OutboundKind) {
        let _ = self.sink.unbounded_send(Ok(OutboundMessage {
            description: self.description.clone(),
            kind,
        }));
    }

    fn fail(&self, error: Error) {
        let _ = self.sink.unbounded_send(Err(error));
    }
}

/// State machine for one run: `Start`, body invocation, merge loop,
/// teardown, terminal message. Returning from this function is the
/// `Terminated` state.
async fn drive<B, M>(
    body: B,
    argument: Value,
    context: JobContext,
    sink: mpsc::UnboundedSender<Result<OutboundMessage, Error>>,
) where
    B: JobBody<M>,
{
    let JobContext {
        description,
        inbound,
    } = context;
    let emitter = Emitter {
        description: description.clone(),
        sink,
    };
    emitter.send(OutboundKind::Start);

    let (input_sender, input_receiver) = mpsc::unbounded();
    let manager = ChannelManager::new(description.clone(), emitter.sink.clone());
    let run_context = RunContext::new(description, Input::new(input_receiver), Arc::clone(&manager));

    let execution = match body.call(argument, run_context) {
        Ok(execution) => execution,
        Err(error) => {
            manager.abort();
            emitter.fail(Error::body(error));
            return;
        }
    };

    let produced = match execution {
        // The value is already here; `Stop` cannot preempt it. Channel
        // traffic the body pushed synchronously is already queued ahead of
        // this `Output`.
        Execution::Value(value) => {
            emitter.send(OutboundKind::Output { value });
            manager.close();
            emitter.send(OutboundKind::End);
            return;
        }
        Execution::Deferred(future) => futures::stream::once(future).boxed(),
        Execution::Stream(stream) => stream,
    };

    let mut inbound = inbound.fuse();
    let mut produced = produced.fuse();

    loop {
        futures::select! {
            item = produced.next() => match item {
                Some(Ok(value)) => emitter.send(OutboundKind::Output { value }),
                Some(Err(error)) => {
                    // Terminal failure: tear channels down silently so the
                    // `Err` is the last item, then stop.
                    manager.abort();
                    emitter.fail(Error::body(error));
                    return;
                }
                None => break,
            },
            message = inbound.next() => match message {
                Some(InboundMessage::Ping { id }) => emitter.send(OutboundKind::Pong { id }),
                Some(InboundMessage::Input { value }) => {
                    if input_sender.unbounded_send(value).is_err() {
                        tracing::debug!("dropped input; the body no longer reads it");
                    }
                }
                // Leaving the loop drops `produced`, which releases a
                // streaming subscription and discards a pending deferred
                // result. A second `Stop` lands after the run terminated
                // and is never observed: a defined no-op.
                Some(InboundMessage::Stop) => break,
                // Inbound source gone. Not a cancellation; the run keeps
                // going on its own production.
                None => {}
            },
        }
    }

    // Natural completion and `Stop` converge here: release the producer,
    // force-complete open channels, then exactly one `End`.
    drop(produced);
    manager.close();
    emitter.send(OutboundKind::End);
}
