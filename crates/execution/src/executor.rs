//! Pull-based executor for a [`QueryPipeline`].
//!
//! The executor repeatedly asks the input for the next chunk and walks it
//! through the transforms into the sink until the input reports
//! end-of-input. Cancellation is cooperative: [`PipelineExecutor::cancel`]
//! flips the status and the run loop observes it at its safe points (before
//! every pull and after every chunk).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use spool_common::{MetricsRegistry, QueryId, Result, SpoolError, global_metrics};
use tracing::{debug, info};

use crate::chunk::Chunk;
use crate::pipeline::{QueryPipeline, ReadProgress, ReadProgressCallback};
use crate::processor::{Sink, Source, Transform};

/// Terminal-state classification reported by [`PipelineExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecutionStatus {
    /// Not yet terminated (includes "not started").
    Running = 0,
    /// Ran to completion or failed.
    Finished = 1,
    /// Stopped by [`PipelineExecutor::cancel`].
    CancelledByUser = 2,
    /// Stopped because the execution time limit elapsed.
    CancelledByTimeout = 3,
}

impl ExecutionStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Finished,
            2 => Self::CancelledByUser,
            3 => Self::CancelledByTimeout,
            _ => Self::Running,
        }
    }

    /// `true` for both cancellation statuses.
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::CancelledByUser | Self::CancelledByTimeout)
    }

    /// Lowercase label used in metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished => "finished",
            Self::CancelledByUser => "cancelled_by_user",
            Self::CancelledByTimeout => "cancelled_by_timeout",
        }
    }
}

struct Processors {
    transforms: Vec<Box<dyn Transform>>,
    sink: Box<dyn Sink>,
}

/// Drives one pipeline run to completion on the calling thread.
pub struct PipelineExecutor {
    query_id: QueryId,
    input: Arc<dyn Source>,
    processors: Mutex<Option<Processors>>,
    status: AtomicU8,
    max_execution_time: Option<Duration>,
    read_progress: Option<ReadProgressCallback>,
    metrics: MetricsRegistry,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("query_id", &self.query_id)
            .field("input", &self.input.name())
            .field("status", &self.execution_status())
            .finish()
    }
}

/// Moves a still-running executor to `Finished` on every exit path,
/// unwinding included.
struct FinishOnExit<'a>(&'a AtomicU8);

impl Drop for FinishOnExit<'_> {
    fn drop(&mut self) {
        let _ = self.0.compare_exchange(
            ExecutionStatus::Running as u8,
            ExecutionStatus::Finished as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl PipelineExecutor {
    /// Build an executor for a pipeline whose input is connected.
    pub fn new(pipeline: QueryPipeline) -> Result<Self> {
        let max_execution_time = pipeline.max_execution_time();
        let read_progress = pipeline.read_progress_callback();
        let QueryPipeline {
            input,
            transforms,
            sink,
            ..
        } = pipeline;
        let input = input.ok_or_else(|| {
            SpoolError::Logical("cannot execute a pipeline with an open input port".to_string())
        })?;
        Ok(Self {
            query_id: QueryId::next(),
            input,
            processors: Mutex::new(Some(Processors { transforms, sink })),
            status: AtomicU8::new(ExecutionStatus::Running as u8),
            max_execution_time,
            read_progress,
            metrics: global_metrics().clone(),
        })
    }

    /// Label logs and metrics with `query_id`.
    pub fn with_query_id(mut self, query_id: QueryId) -> Self {
        self.query_id = query_id;
        self
    }

    /// Record metrics into `metrics` instead of the global registry.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    /// Query id used in logs and metrics.
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// Current status; terminal statuses never change back.
    pub fn execution_status(&self) -> ExecutionStatus {
        ExecutionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Request cooperative cancellation. Non-blocking and idempotent; has no
    /// effect once the run terminated.
    pub fn cancel(&self) {
        if self
            .status
            .compare_exchange(
                ExecutionStatus::Running as u8,
                ExecutionStatus::CancelledByUser as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            info!(query_id = %self.query_id, "pipeline cancellation requested");
            self.input.on_cancel();
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Parallel execution is not implemented: `num_threads` and
    /// `concurrency_control` are accepted for contract compatibility and the
    /// chain runs on the calling thread. May be called once.
    pub fn execute(&self, num_threads: usize, concurrency_control: bool) -> Result<()> {
        let processors = self
            .processors
            .lock()
            .map_err(|_| SpoolError::Execution("executor state lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| {
                SpoolError::Logical("pipeline executor can be executed only once".to_string())
            })?;
        debug!(
            query_id = %self.query_id,
            num_threads,
            concurrency_control,
            input = self.input.name(),
            transforms = processors.transforms.len(),
            sink = processors.sink.name(),
            "pipeline execution started"
        );

        let started = Instant::now();
        let result = {
            let _finish = FinishOnExit(&self.status);
            self.run(processors, started)
        };

        let status = self.execution_status();
        let label = match (&result, status) {
            (_, s) if s.is_cancelled() => s.as_str(),
            (Ok(()), _) => "finished",
            (Err(_), _) => "failed",
        };
        self.metrics.record_run(&self.query_id.to_string(), label);
        debug!(
            query_id = %self.query_id,
            status = label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline execution ended"
        );
        result
    }

    fn run(&self, mut processors: Processors, started: Instant) -> Result<()> {
        let query_id = self.query_id.to_string();
        loop {
            self.check_cancelled(started)?;

            let t0 = Instant::now();
            let Some(mut chunk) = self.input.generate()? else {
                break;
            };
            self.record(&query_id, self.input.name(), &chunk, t0);
            if let Some(callback) = &self.read_progress {
                callback(ReadProgress {
                    rows: chunk.num_rows() as u64,
                    bytes: chunk.byte_size() as u64,
                });
            }
            self.check_cancelled(started)?;

            for transform in processors.transforms.iter_mut() {
                let t0 = Instant::now();
                chunk = transform.transform(chunk)?;
                self.record(&query_id, transform.name(), &chunk, t0);
            }

            let t0 = Instant::now();
            let rows = chunk.num_rows() as u64;
            processors.sink.consume(chunk)?;
            self.metrics.record_processor(
                &query_id,
                processors.sink.name(),
                rows,
                t0.elapsed().as_secs_f64(),
            );
        }
        // A cancelled source may report end-of-input; that is not a normal end.
        self.check_cancelled(started)?;
        processors.sink.on_finish()
    }

    fn record(&self, query_id: &str, processor: &str, chunk: &Chunk, t0: Instant) {
        self.metrics.record_processor(
            query_id,
            processor,
            chunk.num_rows() as u64,
            t0.elapsed().as_secs_f64(),
        );
    }

    fn check_cancelled(&self, started: Instant) -> Result<()> {
        if let Some(limit) = self.max_execution_time {
            if started.elapsed() > limit
                && self
                    .status
                    .compare_exchange(
                        ExecutionStatus::Running as u8,
                        ExecutionStatus::CancelledByTimeout as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                info!(
                    query_id = %self.query_id,
                    limit_ms = limit.as_millis() as u64,
                    "pipeline execution time limit exceeded"
                );
                self.input.on_cancel();
            }
        }
        if self.execution_status().is_cancelled() {
            return Err(SpoolError::Cancelled("query was cancelled".to_string()));
        }
        Ok(())
    }
}
