//! Push front-end for pull-based pipelines.
//!
//! [`PushingPipelineExecutor`] lets a caller hand chunks to a pipeline
//! synchronously while a dedicated worker thread drives the pipeline with a
//! [`crate::PipelineExecutor`]. The two sides meet in a [`PushingSource`],
//! which holds at most one pending chunk.

mod executor;
mod source;

pub use executor::{CancelHandle, PushingPipelineExecutor};
pub use source::PushingSource;
