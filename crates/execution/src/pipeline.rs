//! Pipeline description handed to executors.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arrow_schema::SchemaRef;
use spool_common::{PipelineConfig, Result, SpoolError};

use crate::processor::{Sink, Source, Transform};

/// Rows and bytes pulled from a pipeline input in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadProgress {
    /// Rows in the pulled chunk.
    pub rows: u64,
    /// Approximate bytes in the pulled chunk.
    pub bytes: u64,
}

/// Callback invoked by the executor for every chunk pulled from the input.
pub type ReadProgressCallback = Arc<dyn Fn(ReadProgress) + Send + Sync>;

/// A linear processor chain with an input port and a sink.
///
/// A pipeline built with [`QueryPipeline::pushing`] leaves its input port
/// open; something must [`connect_input`](QueryPipeline::connect_input) before
/// the pipeline can be executed.
pub struct QueryPipeline {
    header: SchemaRef,
    pub(crate) input: Option<Arc<dyn Source>>,
    pub(crate) transforms: Vec<Box<dyn Transform>>,
    pub(crate) sink: Box<dyn Sink>,
    num_threads: usize,
    concurrency_control: bool,
    max_execution_time: Option<Duration>,
    read_progress: Option<ReadProgressCallback>,
}

impl fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("header", &self.header)
            .field("input", &self.input.as_ref().map(|s| s.name()))
            .field(
                "transforms",
                &self.transforms.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("sink", &self.sink.name())
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl QueryPipeline {
    /// Pipeline with an open input port accepting chunks shaped like `header`.
    pub fn pushing(header: SchemaRef, sink: impl Sink + 'static) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            header,
            input: None,
            transforms: Vec::new(),
            sink: Box::new(sink),
            num_threads: defaults.num_threads,
            concurrency_control: defaults.concurrency_control,
            max_execution_time: defaults.max_execution_time(),
            read_progress: None,
        }
    }

    /// Append a transform after the existing ones.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Take thread count, concurrency control and time limit from `config`.
    pub fn with_config(mut self, config: &PipelineConfig) -> Self {
        self.num_threads = config.num_threads.max(1);
        self.concurrency_control = config.concurrency_control;
        self.max_execution_time = config.max_execution_time();
        self
    }

    /// Observe every chunk pulled from the input.
    pub fn with_read_progress_callback(mut self, callback: ReadProgressCallback) -> Self {
        self.read_progress = Some(callback);
        self
    }

    /// Schema expected on the input port.
    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    /// `true` while the input port is still open.
    pub fn is_pushing(&self) -> bool {
        self.input.is_none()
    }

    /// Threads the pipeline asks its executor for.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Whether the executor should respect global concurrency limits.
    pub fn concurrency_control(&self) -> bool {
        self.concurrency_control
    }

    /// Wall-clock limit enforced by the executor, if any.
    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time
    }

    /// Progress callback handed to the executor.
    pub fn read_progress_callback(&self) -> Option<ReadProgressCallback> {
        self.read_progress.clone()
    }

    /// Wire `source` into the input port.
    pub fn connect_input(&mut self, source: Arc<dyn Source>) -> Result<()> {
        if let Some(existing) = &self.input {
            return Err(SpoolError::Logical(format!(
                "pipeline input is already connected to {}",
                existing.name()
            )));
        }
        if source.schema().fields() != self.header.fields() {
            return Err(SpoolError::Logical(format!(
                "source {} schema does not match pipeline header",
                source.name()
            )));
        }
        self.input = Some(source);
        Ok(())
    }
}
