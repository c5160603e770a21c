#![deny(missing_docs)]

//! Execution-layer primitives: processors, pipelines, the pull executor and
//! the push bridge in front of it.
//!
//! Architecture role:
//! - column chunks exchanged between processors
//! - source/transform/sink contracts and the pipeline that chains them
//! - pull-based execution with cooperative cancellation
//! - synchronous push into a pipeline running on a worker thread
//!
//! Key modules:
//! - [`chunk`]
//! - [`context`]
//! - [`executor`]
//! - [`pipeline`]
//! - [`processor`]
//! - [`pushing`]

pub mod chunk;
pub mod context;
pub mod executor;
pub mod pipeline;
pub mod processor;
pub mod pushing;

// Re-export only what you want at the crate root (no globs).
pub use chunk::Chunk;
pub use context::WorkerContext;
pub use executor::{ExecutionStatus, PipelineExecutor};
pub use pipeline::{QueryPipeline, ReadProgress, ReadProgressCallback};
pub use processor::{MapTransform, MemorySink, MemorySinkHandle, Sink, Source, Transform};
pub use pushing::{CancelHandle, PushingPipelineExecutor, PushingSource};
