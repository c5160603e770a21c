//! Processor contracts driven by [`crate::PipelineExecutor`].
//!
//! A pipeline is a chain `Source -> Transform* -> Sink`. The executor pulls
//! from the source, so a source decides when data becomes available and when
//! input ends.

use std::sync::{Arc, Mutex};

use arrow_schema::SchemaRef;
use spool_common::{Result, SpoolError};

use crate::chunk::Chunk;

/// Pull side of a pipeline input.
///
/// Sources are shared between the executor and whoever feeds them, so every
/// method takes `&self`.
pub trait Source: Send + Sync {
    /// Stable processor name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Schema of every chunk produced by this source.
    fn schema(&self) -> SchemaRef;

    /// Produce the next chunk, blocking if necessary.
    ///
    /// `Ok(None)` signals end-of-input.
    fn generate(&self) -> Result<Option<Chunk>>;

    /// Called by the executor when the run is cancelled. Sources that block in
    /// [`Source::generate`] must wake up here.
    fn on_cancel(&self) {}
}

/// One-in/one-out processing step.
pub trait Transform: Send {
    /// Stable processor name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Turn one input chunk into one output chunk.
    fn transform(&mut self, chunk: Chunk) -> Result<Chunk>;
}

/// Terminal processor consuming every chunk that reaches the end of the chain.
pub trait Sink: Send {
    /// Stable processor name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Consume one chunk.
    fn consume(&mut self, chunk: Chunk) -> Result<()>;

    /// Called once after the source reported end-of-input. Not called on
    /// failure or cancellation.
    fn on_finish(&mut self) -> Result<()> {
        Ok(())
    }
}

type MapFn = Box<dyn FnMut(Chunk) -> Result<Chunk> + Send>;

/// [`Transform`] backed by a closure.
pub struct MapTransform {
    name: &'static str,
    f: MapFn,
}

impl MapTransform {
    /// Wrap `f` under the processor name `name`.
    pub fn new<F>(name: &'static str, f: F) -> Self
    where
        F: FnMut(Chunk) -> Result<Chunk> + Send + 'static,
    {
        Self {
            name,
            f: Box::new(f),
        }
    }
}

impl Transform for MapTransform {
    fn name(&self) -> &'static str {
        self.name
    }

    fn transform(&mut self, chunk: Chunk) -> Result<Chunk> {
        (self.f)(chunk)
    }
}

#[derive(Debug, Default)]
struct MemorySinkState {
    chunks: Vec<Chunk>,
    finished: bool,
}

/// [`Sink`] that keeps every chunk in memory.
#[derive(Debug)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

/// Read side of a [`MemorySink`], usable after the sink moved into a pipeline.
#[derive(Debug, Clone)]
pub struct MemorySinkHandle {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    /// Create a sink and the handle observing it.
    pub fn new() -> (Self, MemorySinkHandle) {
        let state = Arc::new(Mutex::new(MemorySinkState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            MemorySinkHandle { state },
        )
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &'static str {
        "MemorySink"
    }

    fn consume(&mut self, chunk: Chunk) -> Result<()> {
        self.state
            .lock()
            .map_err(|_| SpoolError::Execution("memory sink lock poisoned".to_string()))?
            .chunks
            .push(chunk);
        Ok(())
    }

    fn on_finish(&mut self) -> Result<()> {
        self.state
            .lock()
            .map_err(|_| SpoolError::Execution("memory sink lock poisoned".to_string()))?
            .finished = true;
        Ok(())
    }
}

impl MemorySinkHandle {
    /// Chunks consumed so far, in arrival order.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.state
            .lock()
            .map(|s| s.chunks.clone())
            .unwrap_or_default()
    }

    /// Row counts of the consumed chunks, in arrival order.
    pub fn row_counts(&self) -> Vec<usize> {
        self.state
            .lock()
            .map(|s| s.chunks.iter().map(Chunk::num_rows).collect())
            .unwrap_or_default()
    }

    /// `true` once the sink observed end-of-input.
    pub fn is_finished(&self) -> bool {
        self.state.lock().map(|s| s.finished).unwrap_or(false)
    }
}
