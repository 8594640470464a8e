//! Handler decorators: lazy loading and protocol logging.
//!
//! Both implement [`JobHandler`] by explicit forwarding and leave the
//! wrapped protocol behavior untouched.

use futures::StreamExt as _;

use crate::context::JobContext;
use crate::engine::{Error, JobHandler, OutboundStream};
use crate::message::Value;
use crate::BoxError;

/// Resolve a handler from a factory on first use of each run.
///
/// The factory is awaited exactly once per invocation, then the entire run
/// is delegated to the resolved handler. A factory failure is a terminal
/// run failure on the returned stream.
pub struct LazyLoader<F> {
    factory: F,
}

impl<F> LazyLoader<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, Fut, H> JobHandler for LazyLoader<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<H, BoxError>> + Send + 'static,
    H: JobHandler + 'static,
{
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream {
        let resolving = (self.factory)();
        futures::stream::once(async move {
            match resolving.await {
                Ok(handler) => handler.handle(argument, context),
                Err(error) => {
                    futures::stream::once(futures::future::ready(Err(Error::factory(error))))
                        .boxed()
                }
            }
        })
        .flatten()
        .boxed()
    }
}

/// Mirror every inbound and outbound message of a run as `tracing` events.
pub struct LoggingWrapper<H> {
    inner: H,
}

impl<H> LoggingWrapper<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H> JobHandler for LoggingWrapper<H>
where
    H: JobHandler,
{
    fn handle(&self, argument: Value, context: JobContext) -> OutboundStream {
        let JobContext {
            description,
            inbound,
        } = context;
        let job = description.name.clone();
        let inbound = inbound
            .inspect(move |message| {
                tracing::debug!(job = %job, message = ?message, "inbound message");
            })
            .boxed();

        let job = description.name.clone();
        let done = job.clone();
        let context = JobContext {
            description,
            inbound,
        };
        let completed = futures::stream::once(async move {
            tracing::debug!(job = %done, "outbound stream completed");
        })
        .filter_map(|()| futures::future::ready(None));

        self.inner
            .handle(argument, context)
            .inspect(move |item| match item {
                Ok(message) => {
                    tracing::debug!(job = %job, message = ?message.kind, "outbound message");
                }
                Err(error) => {
                    tracing::error!(job = %job, error = %error, "run failed");
                }
            })
            .chain(completed)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{InboundMessage, JobDescription, OutboundKind};
    use crate::{Execution, handler};
    use futures::StreamExt as _;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> JobContext {
        JobContext::new(
            JobDescription::new("wrapped"),
            futures::stream::empty::<InboundMessage>(),
        )
    }

    fn kinds(run: OutboundStream) -> Vec<OutboundKind> {
        futures::executor::block_on(run.map(|item| item.unwrap().kind).collect())
    }

    #[test]
    fn lazy_loader_resolves_once_per_invocation() {
        let resolved = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&resolved);
        let lazy = LazyLoader::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(handler(|| Ok(Execution::from(json!("ready")))))
            }
        });

        let first = kinds(lazy.handle(json!(null), context()));
        assert_eq!(
            first,
            vec![
                OutboundKind::Start,
                OutboundKind::Output {
                    value: json!("ready")
                },
                OutboundKind::End,
            ]
        );
        assert_eq!(resolved.load(Ordering::SeqCst), 1);

        let _ = kinds(lazy.handle(json!(null), context()));
        assert_eq!(resolved.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn lazy_loader_factory_failure_fails_the_run() {
        let lazy = LazyLoader::new(|| async {
            Err::<Arc<dyn JobHandler>, BoxError>(BoxError::from("missing module"))
        });

        let items = futures::executor::block_on(
            lazy.handle(json!(null), context()).collect::<Vec<_>>(),
        );
        assert_eq!(items.len(), 1);
        let error = items[0].as_ref().unwrap_err();
        assert_eq!(error.kind(), crate::engine::ErrorKind::Factory);
    }

    #[test]
    fn logging_wrapper_is_sequence_transparent() {
        let wrapped = LoggingWrapper::new(handler(|| Ok(Execution::from(json!(7)))));
        assert_eq!(
            kinds(wrapped.handle(json!(null), context())),
            vec![
                OutboundKind::Start,
                OutboundKind::Output { value: json!(7) },
                OutboundKind::End,
            ]
        );
    }
}
