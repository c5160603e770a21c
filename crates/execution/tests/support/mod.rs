#![allow(dead_code)]

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use arrow::array::{Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use spool_common::{Result, SpoolError};
use spool_execution::{Chunk, MemorySink, MemorySinkHandle, Sink};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Run `f` with a thread-local subscriber and return everything it logged.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let writer = {
        let buf = Arc::clone(&buf);
        move || SharedWriter(Arc::clone(&buf))
    };
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buf.lock().unwrap_or_else(|e| e.into_inner()).clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedWriter {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn header() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, true),
    ]))
}

pub fn batch(rows: usize) -> RecordBatch {
    let ids = (0..rows as i64).collect::<Vec<_>>();
    let names = (0..rows).map(|i| format!("row-{i}")).collect::<Vec<_>>();
    RecordBatch::try_new(
        header(),
        vec![
            Arc::new(Int64Array::from(ids)),
            Arc::new(StringArray::from(names)),
        ],
    )
    .expect("batch")
}

pub fn chunk(rows: usize) -> Chunk {
    Chunk::from(batch(rows))
}

/// Release side of a [`GatedSink`]. Dropping it opens the gate for good.
pub struct Gate {
    tx: Sender<()>,
}

impl Gate {
    pub fn release_one(&self) {
        let _ = self.tx.send(());
    }
}

/// Sink that waits on a [`Gate`] before consuming each chunk, then either
/// records the chunk or fails with `fail_with`.
pub struct GatedSink {
    rx: Receiver<()>,
    fail_with: Option<String>,
    inner: MemorySink,
}

impl GatedSink {
    pub fn new() -> (Self, Gate, MemorySinkHandle) {
        Self::build(None)
    }

    pub fn failing(message: &str) -> (Self, Gate, MemorySinkHandle) {
        Self::build(Some(message.to_string()))
    }

    fn build(fail_with: Option<String>) -> (Self, Gate, MemorySinkHandle) {
        let (tx, rx) = mpsc::channel();
        let (inner, handle) = MemorySink::new();
        (
            Self {
                rx,
                fail_with,
                inner,
            },
            Gate { tx },
            handle,
        )
    }
}

impl Sink for GatedSink {
    fn name(&self) -> &'static str {
        "GatedSink"
    }

    fn consume(&mut self, chunk: Chunk) -> Result<()> {
        // A dropped gate reads as permanently open.
        let _ = self.rx.recv();
        if let Some(message) = &self.fail_with {
            return Err(SpoolError::Execution(message.clone()));
        }
        self.inner.consume(chunk)
    }

    fn on_finish(&mut self) -> Result<()> {
        self.inner.on_finish()
    }
}

/// Sink failing on every chunk.
pub struct FailingSink(pub &'static str);

impl Sink for FailingSink {
    fn name(&self) -> &'static str {
        "FailingSink"
    }

    fn consume(&mut self, _chunk: Chunk) -> Result<()> {
        Err(SpoolError::Execution(self.0.to_string()))
    }
}

/// Sink panicking on the first chunk.
pub struct PanickingSink;

impl Sink for PanickingSink {
    fn name(&self) -> &'static str {
        "PanickingSink"
    }

    fn consume(&mut self, _chunk: Chunk) -> Result<()> {
        panic!("sink exploded");
    }
}

/// Sink sleeping `delay` per chunk.
pub struct SlowSink {
    pub delay: Duration,
}

impl Sink for SlowSink {
    fn name(&self) -> &'static str {
        "SlowSink"
    }

    fn consume(&mut self, _chunk: Chunk) -> Result<()> {
        thread::sleep(self.delay);
        Ok(())
    }
}

/// Sink recording the name of the thread it runs on.
pub struct ThreadNameSink(pub Arc<Mutex<Option<String>>>);

impl Sink for ThreadNameSink {
    fn name(&self) -> &'static str {
        "ThreadNameSink"
    }

    fn consume(&mut self, _chunk: Chunk) -> Result<()> {
        *self.0.lock().expect("thread name") = thread::current().name().map(str::to_string);
        Ok(())
    }
}
