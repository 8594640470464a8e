//! Adapt a unit of work into a cancellable, observable job protocol.
//!
//! A job body may return a plain value, a deferred value or a stream of
//! values. The engine normalizes all three into one outbound message
//! sequence (`Start`, then outputs/logs/channel traffic, then `End`) while
//! concurrently answering inbound control messages (ping, stop, streamed
//! input).
//!
//! Why:
//! - One observable surface per run; the outbound sequence is the job's
//!   complete externally visible behavior.
//! - Control and progress are merged by a single cooperative task, so the
//!   sequence is a valid interleaving that never reorders one source.
//! - Cancellation is a protocol message (`Stop`), not a dropped
//!   subscription, and always resolves with a normal `End`.
//!
//! ```no_run
//! use denrei::{Argument, Execution, JobContext, JobDescription, RunContext, handler};
//! use denrei::JobHandler as _;
//!
//! let double = handler(|Argument(value): Argument, context: RunContext| {
//!     context.logger().info("doubling");
//!     let n = value.as_u64().unwrap_or(0);
//!     Ok(Execution::from(serde_json::json!(n * 2)))
//! });
//!
//! # let inbound = futures::stream::pending();
//! let run = double.handle(
//!     serde_json::json!(21),
//!     JobContext::new(JobDescription::new("double"), inbound),
//! );
//! // Polling `run` starts the job and yields Start, Log, Output(42), End.
//! ```

pub mod channel;
pub mod context;
pub mod decorator;
pub mod engine;
pub mod message;

pub use channel::{ChannelAlreadyOpen, ChannelHandle};
pub use context::{Input, JobContext, Logger, RunContext};
pub use decorator::{LazyLoader, LoggingWrapper};
pub use engine::{Error, ErrorKind, FnHandler, JobHandler, OutboundStream, handler};
pub use message::{
    InboundMessage, JobDescription, LogEntry, LogLevel, OutboundKind, OutboundMessage, Value,
};

/// Boxed error carried by deferred/streaming executions and run failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What invoking a job body produced.
///
/// A closed three-way dispatch instead of runtime shape probing: the
/// variant decides how many `Output` messages the run emits and whether a
/// `Stop` can preempt in-flight work (only [`Execution::Stream`] can be
/// released mid-flight).
pub enum Execution {
    /// A single value, available synchronously. Emits exactly one `Output`.
    Value(Value),
    /// A single value, available later. Emits exactly one `Output` on
    /// success; a rejection fails the run.
    Deferred(futures::future::BoxFuture<'static, Result<Value, BoxError>>),
    /// Zero or more values in production order, one `Output` each.
    Stream(futures::stream::BoxStream<'static, Result<Value, BoxError>>),
}

impl Execution {
    /// Wrap a future as a deferred single result.
    pub fn deferred<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// Wrap a stream as a multi-value result.
    pub fn stream<St>(stream: St) -> Self
    where
        St: futures::Stream<Item = Result<Value, BoxError>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }
}

impl From<Value> for Execution {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Trait implemented by functions that serve as a job body.
///
/// The `M` type parameter determines which combination of [`Argument`] and
/// [`RunContext`] the body expects. A body is invoked once per run with the
/// caller's argument and the run-local context; a synchronous `Err` is a
/// run failure.
pub trait JobBody<M>: Send + Sync + Clone + 'static {
    /// Invoke the body for one run.
    fn call(self, argument: Value, context: RunContext) -> Result<Execution, BoxError>;
}

/// Explicitly opt-in to receive the caller's argument.
///
/// Why: keep dependencies visible in signatures; a body that ignores its
/// argument says so by leaving this off.
pub struct Argument(pub Value);

impl<F> JobBody<()> for F
where
    F: FnOnce() -> Result<Execution, BoxError> + Clone + Send + Sync + 'static,
{
    fn call(self, _argument: Value, _context: RunContext) -> Result<Execution, BoxError> {
        self()
    }
}

impl<F> JobBody<Argument> for F
where
    F: FnOnce(Argument) -> Result<Execution, BoxError> + Clone + Send + Sync + 'static,
{
    fn call(self, argument: Value, _context: RunContext) -> Result<Execution, BoxError> {
        self(Argument(argument))
    }
}

impl<F> JobBody<RunContext> for F
where
    F: FnOnce(RunContext) -> Result<Execution, BoxError> + Clone + Send + Sync + 'static,
{
    fn call(self, _argument: Value, context: RunContext) -> Result<Execution, BoxError> {
        self(context)
    }
}

impl<F> JobBody<(Argument, RunContext)> for F
where
    F: FnOnce(Argument, RunContext) -> Result<Execution, BoxError> + Clone + Send + Sync + 'static,
{
    fn call(self, argument: Value, context: RunContext) -> Result<Execution, BoxError> {
        self(Argument(argument), context)
    }
}
