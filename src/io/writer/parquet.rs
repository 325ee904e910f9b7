use super::Writer;
use crate::error::{CopyError, Result};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Default number of rows a worker stages before writing into the shared file
const DEFAULT_PARTITION_SIZE: usize = 10000;

/// Parquet output through a shared `ArrowWriter`
pub struct ParquetWriter {
    partition_size: usize,
    properties: Option<WriterProperties>,
}

pub struct ParquetGlobal {
    writer: Mutex<Option<ArrowWriter<File>>>,
    path: PathBuf,
}

pub struct ParquetLocal {
    buffer: Vec<RecordBatch>,
    buffered_rows: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            partition_size: DEFAULT_PARTITION_SIZE,
            properties: None,
        }
    }

    pub fn with_partition_size(mut self, partition_size: usize) -> Self {
        self.partition_size = partition_size;
        self
    }

    pub fn with_properties(mut self, properties: WriterProperties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Flush the worker's staged batches into the shared writer
    fn flush(&self, global: &ParquetGlobal, local: &mut ParquetLocal) -> Result<()> {
        if local.buffer.is_empty() {
            return Ok(());
        }

        let mut guard = global.writer.lock();
        let writer = guard.as_mut().ok_or(CopyError::WriterUnavailable)?;
        for batch in local.buffer.drain(..) {
            writer.write(&batch)?;
        }
        local.buffered_rows = 0;
        Ok(())
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ParquetGlobal {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes flushed to the file plus the size of the row group in progress
    pub fn bytes_written(&self) -> u64 {
        match self.writer.lock().as_ref() {
            Some(writer) => (writer.bytes_written() + writer.in_progress_size()) as u64,
            None => 0,
        }
    }
}

impl Writer for ParquetWriter {
    type Global = ParquetGlobal;
    type Local = ParquetLocal;

    fn extension(&self) -> &str {
        "parquet"
    }

    fn initialize_global(&self, path: &Path, schema: &SchemaRef) -> Result<ParquetGlobal> {
        let output_file = File::create(path).map_err(|e| CopyError::io(path, e))?;
        let writer = ArrowWriter::try_new(output_file, schema.clone(), self.properties.clone())?;
        Ok(ParquetGlobal {
            writer: Mutex::new(Some(writer)),
            path: path.to_path_buf(),
        })
    }

    fn initialize_local(&self) -> Result<ParquetLocal> {
        Ok(ParquetLocal {
            buffer: Vec::new(),
            buffered_rows: 0,
        })
    }

    fn sink(
        &self,
        global: &ParquetGlobal,
        local: &mut ParquetLocal,
        batch: &RecordBatch,
    ) -> Result<()> {
        local.buffered_rows += batch.num_rows();
        local.buffer.push(batch.clone());

        // Auto-flush when buffer reaches partition size
        if local.buffered_rows >= self.partition_size {
            self.flush(global, local)?;
        }
        Ok(())
    }

    fn combine(&self, global: &ParquetGlobal, local: &mut ParquetLocal) -> Result<()> {
        self.flush(global, local)
    }

    fn finalize(&self, global: ParquetGlobal) -> Result<()> {
        if let Some(writer) = global.writer.into_inner() {
            writer.close()?;
        }
        Ok(())
    }

    fn supports_rotation(&self) -> bool {
        true
    }

    fn rotate_next_file(&self, global: &ParquetGlobal, file_size_bytes: Option<u64>) -> bool {
        match file_size_bytes {
            Some(limit) => global.bytes_written() >= limit,
            None => false,
        }
    }
}
