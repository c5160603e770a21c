use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use spool_common::{
    DEFAULT_WORKER_THREAD_NAME, MetricsRegistry, PipelineConfig, QueryId, Result, SpoolError,
    global_metrics,
};
use tracing::{debug, error, info, warn};

use crate::chunk::Chunk;
use crate::context::WorkerContext;
use crate::executor::{ExecutionStatus, PipelineExecutor};
use crate::pipeline::QueryPipeline;
use crate::processor::Source;
use crate::pushing::source::PushingSource;

/// Error written by the worker, read and cleared by the first caller that
/// looks at it.
#[derive(Debug, Default)]
struct CapturedError {
    has_error: AtomicBool,
    error: Mutex<Option<SpoolError>>,
}

impl CapturedError {
    fn capture(&self, err: SpoolError) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        self.has_error.store(true, Ordering::Release);
    }

    fn take(&self) -> Option<SpoolError> {
        if !self.has_error.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[derive(Debug, Default)]
struct RunState {
    error: CapturedError,
    completed: Mutex<bool>,
    completion_cv: Condvar,
}

impl RunState {
    fn rethrow_if_has(&self) -> Result<()> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn is_completed(&self) -> bool {
        *self.completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_completed(&self) {
        let mut done = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        self.completion_cv.notify_all();
    }

    fn wait_completed(&self, timeout: Duration) -> bool {
        let done = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        let (done, _) = self
            .completion_cv
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(PoisonError::into_inner);
        *done
    }
}

/// Worker thread handle joined at most once, on drop at the latest.
#[derive(Debug)]
struct WorkerThread(Option<JoinHandle<()>>);

impl WorkerThread {
    fn join(&mut self) {
        if let Some(handle) = self.0.take() {
            // The routine catches processor panics; this only trips on a bug in the routine itself.
            if handle.join().is_err() {
                error!("pushing pipeline worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        self.join();
    }
}

#[derive(Debug)]
struct RunData {
    executor: Arc<PipelineExecutor>,
    state: Arc<RunState>,
    thread: WorkerThread,
}

/// Cloneable handle that cancels a running [`PushingPipelineExecutor`] from
/// another thread, e.g. while the owner is blocked in `push`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    executor: Arc<PipelineExecutor>,
    state: Arc<RunState>,
}

impl CancelHandle {
    /// Request cooperative cancellation unless the run already completed.
    /// Non-blocking; the owner observes the outcome through `push`/`finish`.
    pub fn cancel(&self) {
        if !self.state.is_completed() {
            self.executor.cancel();
        }
    }
}

/// Synchronous push front-end for a pull-based pipeline.
///
/// The pipeline runs on a dedicated worker thread started on the first
/// [`push`](Self::push) (or [`start`](Self::start)). Every pushed chunk goes
/// through a single-slot [`PushingSource`], so chunks reach the pipeline in
/// push order and `push` waits for the executor to take the previous chunk.
///
/// Failures raised on the worker are reported once, by the next `push`,
/// [`finish`](Self::finish) or [`cancel`](Self::cancel). A bridge dropped
/// without `finish` is cancelled; errors raised then are logged.
#[derive(Debug)]
pub struct PushingPipelineExecutor {
    query_id: QueryId,
    header: SchemaRef,
    source: Arc<PushingSource>,
    pipeline: Option<QueryPipeline>,
    num_threads: usize,
    concurrency_control: bool,
    thread_name: String,
    metrics: MetricsRegistry,
    data: Option<RunData>,
    started: bool,
    finished: bool,
}

impl PushingPipelineExecutor {
    /// Wrap a pushing pipeline, connecting a [`PushingSource`] to its input.
    pub fn new(mut pipeline: QueryPipeline) -> Result<Self> {
        if !pipeline.is_pushing() {
            return Err(SpoolError::Logical(
                "pipeline for pushing executor must be pushing".to_string(),
            ));
        }
        let header = pipeline.header().clone();
        let source = Arc::new(PushingSource::new(header.clone()));
        pipeline.connect_input(Arc::clone(&source) as Arc<dyn Source>)?;

        Ok(Self {
            query_id: QueryId::next(),
            header,
            source,
            num_threads: pipeline.num_threads(),
            concurrency_control: pipeline.concurrency_control(),
            pipeline: Some(pipeline),
            thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
            metrics: global_metrics().clone(),
            data: None,
            started: false,
            finished: false,
        })
    }

    /// Like [`new`](Self::new), applying `config` to the pipeline and worker.
    pub fn with_config(pipeline: QueryPipeline, config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let mut bridge = Self::new(pipeline.with_config(config))?;
        bridge.thread_name = config.worker_thread_name.clone();
        Ok(bridge)
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

    /// Schema of the pipeline input; stable for the lifetime of the bridge.
    pub fn header(&self) -> &SchemaRef {
        &self.header
    }

    /// Query id used in logs and metrics.
    pub fn query_id(&self) -> QueryId {
        self.query_id
    }

    /// `true` once the worker thread was started.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// `true` once `finish` or `cancel` ran.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `true` once the worker routine returned.
    pub fn is_completed(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.state.is_completed())
    }

    /// Wait up to `timeout` for the worker routine to return. `false` if it is
    /// still running or was never started.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.data
            .as_ref()
            .is_some_and(|d| d.state.wait_completed(timeout))
    }

    /// Executor status, once started.
    pub fn execution_status(&self) -> Option<ExecutionStatus> {
        self.data.as_ref().map(|d| d.executor.execution_status())
    }

    /// Start the worker thread. Idempotent.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let pipeline = self.pipeline.take().ok_or_else(|| {
            SpoolError::Logical("pushing executor pipeline was already consumed".to_string())
        })?;
        let executor = Arc::new(
            PipelineExecutor::new(pipeline)?
                .with_query_id(self.query_id)
                .with_metrics(self.metrics.clone()),
        );
        let state = Arc::new(RunState::default());
        let context =
            WorkerContext::capture(self.query_id, self.thread_name.clone(), self.metrics.clone());

        let spawned = context.spawn({
            let executor = Arc::clone(&executor);
            let state = Arc::clone(&state);
            let source = Arc::clone(&self.source);
            let num_threads = self.num_threads;
            let concurrency_control = self.concurrency_control;
            move |ctx: &WorkerContext| {
                run_worker(
                    ctx,
                    &executor,
                    &state,
                    &source,
                    num_threads,
                    concurrency_control,
                )
            }
        });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.source.finish();
                return Err(e.into());
            }
        };

        info!(
            query_id = %self.query_id,
            thread = %self.thread_name,
            num_threads = self.num_threads,
            "pushing pipeline started"
        );
        self.data = Some(RunData {
            executor,
            state,
            thread: WorkerThread(Some(handle)),
        });
        Ok(())
    }

    fn ensure_started(&mut self) -> Result<()> {
        if !self.started {
            if self.finished {
                return Err(SpoolError::Logical(
                    "pushing executor is already finished".to_string(),
                ));
            }
            self.start()?;
        }
        Ok(())
    }

    fn run_data(&self) -> Result<&RunData> {
        self.data.as_ref().ok_or_else(|| {
            SpoolError::Logical("pushing executor worker is not running".to_string())
        })
    }

    /// Hand `chunk` to the pipeline, blocking until the executor took the
    /// previous one.
    ///
    /// Errors:
    /// - a failure captured on the worker since the last check
    /// - [`SpoolError::Cancelled`] when the run was cancelled or timed out
    /// - [`SpoolError::Logical`] when the pipeline finished before all data
    ///   was pushed
    ///
    /// A worker failure can surface one push late, or only at [`finish`],
    /// since the chunk may be accepted before the worker fails on it. It is
    /// reported exactly once.
    ///
    /// [`finish`]: Self::finish
    pub fn push(&mut self, chunk: Chunk) -> Result<()> {
        let rows = chunk.num_rows();
        self.ensure_started()?;
        let data = self.run_data()?;

        let pushed = self.source.set_data(chunk).is_ok();
        data.state.rethrow_if_has()?;

        if !pushed {
            return Err(error_for_status(data.executor.execution_status()));
        }
        debug!(query_id = %self.query_id, rows, "chunk pushed");
        self.metrics
            .record_push(&self.query_id.to_string(), rows as u64);
        Ok(())
    }

    /// Push a record batch; its fields must match [`header`](Self::header).
    pub fn push_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.schema().fields() != self.header.fields() {
            return Err(SpoolError::Logical(
                "record batch schema does not match pushing executor header".to_string(),
            ));
        }
        self.push(Chunk::from(batch))
    }

    /// Signal end-of-input, wait for the worker to exit and report a pending
    /// worker failure. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        self.source.finish();

        if let Some(data) = self.data.as_mut() {
            data.thread.join();
            data.state.rethrow_if_has()?;
            info!(query_id = %self.query_id, "pushing pipeline finished");
        }
        Ok(())
    }

    /// Cancel the run and [`finish`](Self::finish). Starts the run first when
    /// nothing was pushed yet. Idempotent.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.started && !self.finished {
            self.start()?;
        }
        if let Some(data) = &self.data {
            if !data.state.is_completed() {
                data.executor.cancel();
            }
        }
        self.finish()
    }

    /// Handle for cancelling from another thread. Starts the run if needed.
    pub fn cancel_handle(&mut self) -> Result<CancelHandle> {
        self.ensure_started()?;
        let data = self.run_data()?;
        Ok(CancelHandle {
            executor: Arc::clone(&data.executor),
            state: Arc::clone(&data.state),
        })
    }
}

impl Drop for PushingPipelineExecutor {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.started {
            self.finished = true;
            self.source.finish();
            return;
        }
        if !thread::panicking() {
            warn!(
                query_id = %self.query_id,
                "pushing executor dropped without finish, cancelling"
            );
        }
        match self.cancel() {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                debug!(query_id = %self.query_id, "pushing pipeline cancelled on drop");
            }
            Err(e) => {
                error!(
                    query_id = %self.query_id,
                    error = %e,
                    "pushing pipeline failed while cancelling on drop"
                );
            }
        }
    }
}

fn error_for_status(status: ExecutionStatus) -> SpoolError {
    if status.is_cancelled() {
        return SpoolError::Cancelled("query was cancelled".to_string());
    }
    SpoolError::Logical(
        "pipeline for pushing executor was finished before all data was inserted".to_string(),
    )
}

fn run_worker(
    ctx: &WorkerContext,
    executor: &PipelineExecutor,
    state: &RunState,
    source: &PushingSource,
    num_threads: usize,
    concurrency_control: bool,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        executor.execute(num_threads, concurrency_control)
    }))
    .unwrap_or_else(|payload| {
        ctx.metrics
            .record_run(&ctx.query_id.to_string(), "failed");
        Err(SpoolError::Execution(format!(
            "pipeline worker panicked: {}",
            panic_message(payload.as_ref())
        )))
    });

    match result {
        Ok(()) => debug!(query_id = %ctx.query_id, "pushing pipeline worker done"),
        Err(e) => {
            if e.is_cancelled() {
                info!(query_id = %ctx.query_id, "pushing pipeline cancelled");
            } else {
                error!(query_id = %ctx.query_id, error = %e, "pushing pipeline failed");
            }
            state.error.capture(e);
        }
    }

    // Release a caller blocked in `push` whatever the outcome.
    source.finish();
    state.mark_completed();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
