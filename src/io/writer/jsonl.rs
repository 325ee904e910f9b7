use super::Writer;
use crate::error::{CopyError, Result};
use arrow::datatypes::SchemaRef;
use arrow::json::LineDelimitedWriter;
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of serialized bytes a worker stages before appending to the file
const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Newline-delimited JSON output
pub struct JsonlWriter {
    buffer_size: usize,
}

pub struct JsonlGlobal {
    file: Mutex<BufWriter<File>>,
    path: PathBuf,
    bytes_written: AtomicU64,
}

pub struct JsonlLocal {
    buffer: Vec<u8>,
}

impl JsonlWriter {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Stage at most `buffer_size` bytes per worker before appending (0 appends on every sink)
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Append the worker's staged rows to the shared file
    fn flush_local(&self, global: &JsonlGlobal, local: &mut JsonlLocal) -> Result<()> {
        if local.buffer.is_empty() {
            return Ok(());
        }

        // Write all staged rows at once to keep the lock short
        let mut file = global.file.lock();
        file.write_all(&local.buffer)
            .map_err(|e| CopyError::io(&global.path, e))?;
        global
            .bytes_written
            .fetch_add(local.buffer.len() as u64, Ordering::Relaxed);
        local.buffer.clear();
        Ok(())
    }
}

impl Default for JsonlWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonlGlobal {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }
}

impl Writer for JsonlWriter {
    type Global = JsonlGlobal;
    type Local = JsonlLocal;

    fn extension(&self) -> &str {
        "jsonl"
    }

    fn initialize_global(&self, path: &Path, _schema: &SchemaRef) -> Result<JsonlGlobal> {
        let output_file = File::create(path).map_err(|e| CopyError::io(path, e))?;
        Ok(JsonlGlobal {
            file: Mutex::new(BufWriter::new(output_file)),
            path: path.to_path_buf(),
            bytes_written: AtomicU64::new(0),
        })
    }

    fn initialize_local(&self) -> Result<JsonlLocal> {
        Ok(JsonlLocal { buffer: Vec::new() })
    }

    fn sink(&self, global: &JsonlGlobal, local: &mut JsonlLocal, batch: &RecordBatch) -> Result<()> {
        {
            let mut writer = LineDelimitedWriter::new(&mut local.buffer);
            writer.write(batch)?;
            writer.finish()?;
        }

        if local.buffer.len() >= self.buffer_size {
            self.flush_local(global, local)?;
        }
        Ok(())
    }

    fn combine(&self, global: &JsonlGlobal, local: &mut JsonlLocal) -> Result<()> {
        self.flush_local(global, local)
    }

    fn finalize(&self, global: JsonlGlobal) -> Result<()> {
        let path = global.path;
        let mut file = global.file.into_inner();
        file.flush().map_err(|e| CopyError::io(&path, e))?;
        Ok(())
    }

    fn supports_rotation(&self) -> bool {
        true
    }

    fn rotate_next_file(&self, global: &JsonlGlobal, file_size_bytes: Option<u64>) -> bool {
        match file_size_bytes {
            Some(limit) => global.bytes_written() >= limit,
            None => false,
        }
    }
}
