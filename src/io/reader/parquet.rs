use super::Reader;
use crate::error::{CopyError, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use std::fs::File;

pub struct ParquetReader {
    reader: ParquetRecordBatchReader,
    schema: SchemaRef,
}

impl ParquetReader {
    /// Create a new ParquetReader from a file path
    ///
    /// # Arguments
    /// * `path` - Path to the parquet file
    /// * `batch_size` - Optional batch size for reading. If None, uses default batch size.
    pub fn new(path: &str, batch_size: Option<usize>) -> Result<Self> {
        let file = File::open(path).map_err(|e| CopyError::io(path, e))?;
        let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        if let Some(size) = batch_size {
            builder = builder.with_batch_size(size);
        }

        let schema = builder.schema().clone();
        let reader = builder.build()?;
        Ok(Self { reader, schema })
    }
}

impl Iterator for ParquetReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader
            .next()
            .map(|batch| batch.map_err(CopyError::from))
    }
}

impl Reader for ParquetReader {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}
