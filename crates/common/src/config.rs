use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoolError};

/// Default name given to the thread that drives a pushing pipeline.
pub const DEFAULT_WORKER_THREAD_NAME: &str = "QueryPushPipeEx";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Threads handed to the executor's `execute` entry point.
    pub num_threads: usize,
    pub concurrency_control: bool,
    /// Wall-clock limit checked by the executor at its safe points.
    pub max_execution_time_ms: Option<u64>,
    pub worker_thread_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            concurrency_control: true,
            max_execution_time_ms: None,
            worker_thread_name: DEFAULT_WORKER_THREAD_NAME.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `SPOOL_*` environment variables.
    ///
    /// Unset or unparsable variables keep the default value.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with the `SPOOL_*` values `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::default();
        if let Some(v) = lookup("SPOOL_NUM_THREADS").and_then(|x| x.parse::<usize>().ok()) {
            c.num_threads = v.max(1);
        }
        if let Some(v) = lookup("SPOOL_CONCURRENCY_CONTROL").and_then(|x| x.parse::<bool>().ok()) {
            c.concurrency_control = v;
        }
        if let Some(v) = lookup("SPOOL_MAX_EXECUTION_TIME_MS").and_then(|x| x.parse::<u64>().ok())
        {
            c.max_execution_time_ms = Some(v);
        }
        if let Some(v) = lookup("SPOOL_WORKER_THREAD_NAME") {
            if !v.trim().is_empty() {
                c.worker_thread_name = v;
            }
        }
        c
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(SpoolError::InvalidConfig(
                "num_threads must be at least 1".to_string(),
            ));
        }
        if self.worker_thread_name.trim().is_empty() {
            return Err(SpoolError::InvalidConfig(
                "worker_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_execution_time(&self) -> Option<Duration> {
        self.max_execution_time_ms.map(Duration::from_millis)
    }
}
