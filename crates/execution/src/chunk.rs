//! Column chunks exchanged between processors.

use arrow::array::{Array, ArrayRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow_schema::SchemaRef;
use spool_common::{Result, SpoolError};

/// A set of equally long columns without an attached schema.
///
/// The schema lives on the pipeline header; chunks only carry data. The
/// default chunk has no columns and no rows.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    columns: Vec<ArrayRef>,
    num_rows: usize,
}

impl Chunk {
    /// Build a chunk from columns that all hold `num_rows` values.
    pub fn new(columns: Vec<ArrayRef>, num_rows: usize) -> Result<Self> {
        if let Some(bad) = columns.iter().position(|c| c.len() != num_rows) {
            return Err(SpoolError::Logical(format!(
                "chunk column {bad} has {} rows, expected {num_rows}",
                columns[bad].len()
            )));
        }
        Ok(Self { columns, num_rows })
    }

    /// Number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Column arrays in header order.
    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    /// `true` when the chunk carries neither columns nor rows.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.num_rows == 0
    }

    /// Approximate in-memory size of the column buffers.
    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(|c| c.get_array_memory_size()).sum()
    }

    /// Move the columns out, leaving this chunk empty.
    pub fn take(&mut self) -> Chunk {
        std::mem::take(self)
    }

    /// Attach `schema` and build a record batch.
    pub fn into_record_batch(self, schema: SchemaRef) -> Result<RecordBatch> {
        let options = RecordBatchOptions::new().with_row_count(Some(self.num_rows));
        RecordBatch::try_new_with_options(schema, self.columns, &options)
            .map_err(|e| SpoolError::Execution(format!("chunk to record batch failed: {e}")))
    }
}

impl From<RecordBatch> for Chunk {
    fn from(batch: RecordBatch) -> Self {
        let num_rows = batch.num_rows();
        Self {
            columns: batch.columns().to_vec(),
            num_rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};

    use super::*;

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn record_batch_conversion_keeps_rows_and_columns() {
        let batch = RecordBatch::try_new(
            schema(),
            vec![
                Arc::new(Int64Array::from(vec![1_i64, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .expect("batch");
        let chunk = Chunk::from(batch);
        assert_eq!(chunk.num_rows(), 3);
        assert_eq!(chunk.num_columns(), 2);
        assert!(chunk.byte_size() > 0);

        let back = chunk.into_record_batch(schema()).expect("back");
        assert_eq!(back.num_rows(), 3);
        assert_eq!(back.schema(), schema());
    }

    #[test]
    fn new_rejects_ragged_columns() {
        let err = Chunk::new(
            vec![
                Arc::new(Int64Array::from(vec![1_i64, 2])),
                Arc::new(StringArray::from(vec!["x"])),
            ],
            2,
        )
        .expect_err("ragged");
        assert!(matches!(err, SpoolError::Logical(_)));
    }

    #[test]
    fn take_leaves_empty_chunk() {
        let mut chunk =
            Chunk::new(vec![Arc::new(Int64Array::from(vec![7_i64]))], 1).expect("chunk");
        let taken = chunk.take();
        assert_eq!(taken.num_rows(), 1);
        assert!(chunk.is_empty());
        assert!(Chunk::default().is_empty());
    }
}
