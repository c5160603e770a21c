//! Explicit execution context for worker threads.

use std::io;
use std::thread::{self, JoinHandle};

use spool_common::{MetricsRegistry, QueryId};
use tracing::{Span, info_span};

/// Execution context handed explicitly to a worker thread at spawn time.
///
/// Threads do not inherit the caller's tracing span, so the span current at
/// [`WorkerContext::capture`] is carried over and becomes the parent of the
/// worker's own span.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    /// Query the worker runs for.
    pub query_id: QueryId,

    /// OS thread name.
    pub thread_name: String,

    /// Caller span the worker span is nested under.
    pub parent_span: Span,

    /// Registry the worker reports into.
    pub metrics: MetricsRegistry,
}

impl WorkerContext {
    /// Capture the calling thread's current span.
    pub fn capture(
        query_id: QueryId,
        thread_name: impl Into<String>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            query_id,
            thread_name: thread_name.into(),
            parent_span: Span::current(),
            metrics,
        }
    }

    /// Spawn a named thread running `f` inside the worker span.
    pub fn spawn<F>(self, f: F) -> io::Result<JoinHandle<()>>
    where
        F: FnOnce(&WorkerContext) + Send + 'static,
    {
        thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let span = info_span!(
                    parent: &self.parent_span,
                    "pushing_pipeline_worker",
                    query_id = %self.query_id
                );
                let _entered = span.enter();
                f(&self);
            })
    }
}
