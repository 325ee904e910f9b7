use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use std::path::Path;

use crate::error::Result;

/// Unified writer trait for the output formats of the COPY TO sink
///
/// A format splits its state in two:
/// - `Global`: one open output file, shared by every worker writing into it
/// - `Local`: worker-private staging state merged into a `Global` at combine
///
/// `sink` may be called concurrently on the same `Global` as long as every
/// caller passes its own `Local`. `finalize` takes the handle by value, so it
/// runs at most once per file.
pub trait Writer: Send + Sync {
    type Global: Send + Sync;
    type Local: Send;

    /// Default file extension, without the leading dot
    fn extension(&self) -> &str;

    /// Open a new output file at `path`
    fn initialize_global(&self, path: &Path, schema: &SchemaRef) -> Result<Self::Global>;

    fn initialize_local(&self) -> Result<Self::Local>;

    /// Append the rows of `batch`
    fn sink(&self, global: &Self::Global, local: &mut Self::Local, batch: &RecordBatch)
        -> Result<()>;

    /// Merge whatever `local` still holds into `global`
    fn combine(&self, _global: &Self::Global, _local: &mut Self::Local) -> Result<()> {
        Ok(())
    }

    /// Flush and close the file
    fn finalize(&self, _global: Self::Global) -> Result<()> {
        Ok(())
    }

    fn supports_rotation(&self) -> bool {
        false
    }

    /// Whether the next write should go to a fresh file
    fn rotate_next_file(&self, _global: &Self::Global, _file_size_bytes: Option<u64>) -> bool {
        false
    }
}

pub mod jsonl;
pub mod parquet;
