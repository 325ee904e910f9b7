use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::error::Result;

/// Unified reader trait for input data sources
/// Yields record batches one by one (generator-like API)
pub trait Reader: Iterator<Item = Result<RecordBatch>> + Send {
    /// Get the schema of the data source
    fn schema(&self) -> &SchemaRef;
}

pub mod jsonl;
pub mod multi_file;
pub mod parquet;
