use crate::config::SourceConfig;
use crate::error::{CopyError, Result};

// Filesystem bookkeeping used by the directory policy
pub mod fs;

pub use fs::{FileSystem, LocalFileSystem};

// Reader trait and implementations
pub mod reader;

pub use reader::{
    jsonl::JsonlReader, multi_file::MultiFileReader, parquet::ParquetReader, Reader,
};

// Writer trait and implementations
pub mod writer;

pub use writer::{jsonl::JsonlWriter, parquet::ParquetWriter, Writer};

/// Factory for creating readers based on source configuration
pub struct ReaderFactory;

impl ReaderFactory {
    /// Create a reader from source config, expanding glob patterns in `uris`
    pub fn create(source: &SourceConfig) -> Result<Box<dyn Reader>> {
        let paths = Self::expand_uris(&source.uris)?;

        let mut readers = Vec::with_capacity(paths.len());
        for path in &paths {
            readers.push(Self::create_single(&source.kind, path, source.batch_size)?);
        }

        if readers.len() == 1 {
            if let Some(reader) = readers.pop() {
                return Ok(reader);
            }
        }
        Ok(Box::new(MultiFileReader::new(readers)?))
    }

    fn create_single(kind: &str, path: &str, batch_size: Option<usize>) -> Result<Box<dyn Reader>> {
        // Determine reader type based on source kind or file extension
        let reader: Box<dyn Reader> = if kind == "jsonl"
            || kind == "json"
            || path.ends_with(".jsonl")
            || path.ends_with(".json")
        {
            Box::new(JsonlReader::new(path, batch_size)?)
        } else {
            // Default to parquet
            Box::new(ParquetReader::new(path, batch_size)?)
        };
        Ok(reader)
    }

    /// Expand glob patterns, keeping literal paths as they are
    fn expand_uris(uris: &[String]) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for uri in uris {
            if !uri.contains(['*', '?', '[']) {
                paths.push(uri.clone());
                continue;
            }
            let entries = glob::glob(uri).map_err(|e| {
                CopyError::InvalidOptions(format!("Invalid glob pattern {}: {}", uri, e))
            })?;
            let mut matched: Vec<String> = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| CopyError::io(e.path().to_path_buf(), e.into_error()))?;
                matched.push(path.to_string_lossy().to_string());
            }
            matched.sort();
            paths.extend(matched);
        }

        if paths.is_empty() {
            return Err(CopyError::InvalidOptions(format!(
                "No input files match {:?}",
                uris
            )));
        }
        Ok(paths)
    }
}
