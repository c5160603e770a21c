use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    pushed_chunks: CounterVec,
    pushed_rows: CounterVec,
    processor_rows: CounterVec,
    processor_chunks: CounterVec,
    processor_time_seconds: HistogramVec,
    pipeline_runs: CounterVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_push(&self, query_id: &str, rows: u64) {
        let labels = [query_id];
        self.inner.pushed_chunks.with_label_values(&labels).inc();
        self.inner
            .pushed_rows
            .with_label_values(&labels)
            .inc_by(rows as f64);
    }

    pub fn record_processor(&self, query_id: &str, processor: &str, rows: u64, secs: f64) {
        let labels = [query_id, processor];
        self.inner
            .processor_rows
            .with_label_values(&labels)
            .inc_by(rows as f64);
        self.inner.processor_chunks.with_label_values(&labels).inc();
        self.inner
            .processor_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    /// `status` is one of `finished`, `failed`, `cancelled_by_user`,
    /// `cancelled_by_timeout`.
    pub fn record_run(&self, query_id: &str, status: &str) {
        self.inner
            .pipeline_runs
            .with_label_values(&[query_id, status])
            .inc();
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let pushed_chunks = counter_vec(
            &registry,
            "spool_pushed_chunks_total",
            "Chunks accepted by pushing executors",
            &["query_id"],
        );
        let pushed_rows = counter_vec(
            &registry,
            "spool_pushed_rows_total",
            "Rows accepted by pushing executors",
            &["query_id"],
        );
        let processor_rows = counter_vec(
            &registry,
            "spool_processor_rows_total",
            "Rows processed per processor",
            &["query_id", "processor"],
        );
        let processor_chunks = counter_vec(
            &registry,
            "spool_processor_chunks_total",
            "Chunks processed per processor",
            &["query_id", "processor"],
        );
        let processor_time_seconds = histogram_vec(
            &registry,
            "spool_processor_time_seconds",
            "Time spent in each processor",
            &["query_id", "processor"],
        );
        let pipeline_runs = counter_vec(
            &registry,
            "spool_pipeline_runs_total",
            "Pipeline runs by terminal status",
            &["query_id", "status"],
        );

        Self {
            registry,
            pushed_chunks,
            pushed_rows,
            processor_rows,
            processor_chunks,
            processor_time_seconds,
            pipeline_runs,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_push("q1", 10);
        let text = m.render_prometheus();
        assert!(text.contains("spool_pushed_rows_total"));
        assert!(text.contains("q1"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_push("q1", 5);
        m.record_processor("q1", "MemorySink", 5, 0.01);
        m.record_run("q1", "finished");
        let text = m.render_prometheus();

        assert!(text.contains("spool_pushed_chunks_total"));
        assert!(text.contains("spool_pushed_rows_total"));
        assert!(text.contains("spool_processor_rows_total"));
        assert!(text.contains("spool_processor_chunks_total"));
        assert!(text.contains("spool_processor_time_seconds"));
        assert!(text.contains("spool_pipeline_runs_total"));
        assert!(text.contains("MemorySink"));
    }
}
