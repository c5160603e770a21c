use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use arrow_schema::SchemaRef;
use spool_common::Result;
use tracing::debug;

use crate::chunk::Chunk;
use crate::processor::Source;

#[derive(Debug, Default)]
struct Slot {
    data: Option<Chunk>,
    finished: bool,
}

/// Single-slot rendezvous between one pushing caller and the executor's pull
/// loop.
///
/// At most one chunk is pending at any time: [`PushingSource::set_data`]
/// waits until the executor took the previous chunk, and
/// [`Source::generate`] waits until a chunk arrives or the source is
/// finished.
#[derive(Debug)]
pub struct PushingSource {
    header: SchemaRef,
    slot: Mutex<Slot>,
    condvar: Condvar,
}

impl PushingSource {
    /// Empty, unfinished source producing chunks shaped like `header`.
    pub fn new(header: SchemaRef) -> Self {
        Self {
            header,
            slot: Mutex::new(Slot::default()),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Nothing runs user code under this lock, so a poisoned slot is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand `chunk` to the executor.
    ///
    /// Blocks while the previous chunk has not been pulled yet. Returns the
    /// chunk back untouched when the source is finished. Only one producer
    /// may call this at a time.
    pub fn set_data(&self, chunk: Chunk) -> std::result::Result<(), Chunk> {
        let mut slot = self
            .condvar
            .wait_while(self.lock(), |s| s.data.is_some() && !s.finished)
            .unwrap_or_else(PoisonError::into_inner);

        if slot.finished {
            return Err(chunk);
        }

        debug!(rows = chunk.num_rows(), "pushing source accepted chunk");
        slot.data = Some(chunk);
        self.condvar.notify_all();
        Ok(())
    }

    /// Mark the source finished and wake every waiter. Idempotent.
    pub fn finish(&self) {
        let mut slot = self.lock();
        slot.finished = true;
        self.condvar.notify_all();
    }

    /// `true` once [`PushingSource::finish`] was called.
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }
}

impl Source for PushingSource {
    fn name(&self) -> &'static str {
        "PushingSource"
    }

    fn schema(&self) -> SchemaRef {
        self.header.clone()
    }

    fn generate(&self) -> Result<Option<Chunk>> {
        let mut slot = self
            .condvar
            .wait_while(self.lock(), |s| s.data.is_none() && !s.finished)
            .unwrap_or_else(PoisonError::into_inner);

        let data = slot.data.take();
        self.condvar.notify_all();
        Ok(data)
    }

    fn on_cancel(&self) {
        self.finish();
    }
}
