//! The COPY TO sink: routes record batches from many workers into output files.
//!
//! Lifecycle of one job:
//!   1. `initialize_global` (once): validate the target, open single files
//!   2. `local_state` (once per worker)
//!   3. `sink` (any number of times per worker, concurrently across workers)
//!   4. `combine` (once per worker, consumes the local state)
//!   5. `finalize` (once, consumes the global state, returns the summary)

pub mod global;
pub mod local;
pub mod partition;
pub mod path;

use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{ArrayRef, Int64Array, ListBuilder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde::Serialize;
use tracing::info;

use crate::config::{CopyOptions, WriteMode};
use crate::error::{CopyError, Result};
use crate::io::{FileSystem, LocalFileSystem, Writer};

pub use global::GlobalWriteState;
pub use local::LocalWriteState;
pub use partition::{HivePartitioner, PartitionKey, PartitionValue};
pub use path::FilenamePattern;

/// Result of a finished copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub rows_written: u64,
    /// Every produced file, when `return_files` is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_paths: Option<Vec<String>>,
}

impl CopySummary {
    /// One-row batch: `Count` and, with `return_files`, `Files`
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let mut fields = vec![Field::new("Count", DataType::Int64, false)];
        let mut columns: Vec<ArrayRef> =
            vec![Arc::new(Int64Array::from(vec![self.rows_written as i64]))];

        if let Some(paths) = &self.file_paths {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for path in paths {
                builder.values().append_value(path);
            }
            builder.append(true);
            fields.push(Field::new_list(
                "Files",
                Field::new("item", DataType::Utf8, true),
                false,
            ));
            columns.push(Arc::new(builder.finish()));
        }

        Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
    }
}

pub struct CopyToFile<W: Writer> {
    pub(crate) writer: W,
    pub(crate) options: CopyOptions,
    pub(crate) fs: Arc<dyn FileSystem>,
    /// Target with trailing separators removed
    pub(crate) file_path: PathBuf,
    /// Schema of the data files
    pub(crate) file_schema: SchemaRef,
    pub(crate) partition_columns: Vec<usize>,
    pub(crate) partition_names: Vec<String>,
    /// Columns kept in partition data files, `None` keeps all
    pub(crate) projection: Option<Vec<usize>>,
    pub(crate) pattern: FilenamePattern,
    pub(crate) extension: String,
}

impl<W: Writer> CopyToFile<W> {
    pub fn try_new(writer: W, options: CopyOptions, input_schema: SchemaRef) -> Result<Self> {
        options.validate()?;

        if options.rotate() && !writer.supports_rotation() {
            return Err(CopyError::InvalidOptions(format!(
                "file_size_bytes is not supported by the {} writer",
                writer.extension()
            )));
        }

        let mut partition_columns = Vec::with_capacity(options.partition_by.len());
        for name in &options.partition_by {
            let index = input_schema
                .index_of(name)
                .map_err(|_| CopyError::UnknownPartitionColumn(name.clone()))?;
            partition_columns.push(index);
        }

        let keep_all = options.write_partition_columns
            || partition_columns.is_empty()
            || partition_columns.len() == input_schema.fields().len();
        let (projection, file_schema) = if keep_all {
            (None, input_schema.clone())
        } else {
            let indices: Vec<usize> = (0..input_schema.fields().len())
                .filter(|i| !partition_columns.contains(i))
                .collect();
            let schema = Arc::new(input_schema.project(&indices)?);
            (Some(indices), schema)
        };

        let pattern = FilenamePattern::new(&options.filename_pattern)?;
        let extension = options
            .file_extension
            .clone()
            .unwrap_or_else(|| writer.extension().to_string());
        let file_path = path::trimmed_path(&options.path);

        Ok(Self {
            writer,
            partition_names: options.partition_by.clone(),
            options,
            fs: Arc::new(LocalFileSystem),
            file_path,
            file_schema,
            partition_columns,
            projection,
            pattern,
            extension,
        })
    }

    /// Replace the file system used for directory bookkeeping
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn options(&self) -> &CopyOptions {
        &self.options
    }

    pub fn mode(&self) -> WriteMode {
        self.options.mode()
    }

    pub fn file_schema(&self) -> &SchemaRef {
        &self.file_schema
    }

    /// Where a single-file job writes until finalize
    fn single_file_output(&self) -> PathBuf {
        if self.options.uses_tmp_file() {
            path::tmp_file_path(&self.file_path)
        } else {
            self.file_path.clone()
        }
    }

    /// Check and prepare the target, then open the files known up front.
    ///
    /// Every precondition failure is raised here, before any row is written.
    pub fn initialize_global(&self) -> Result<GlobalWriteState<W>> {
        path::prepare_target(self.fs.as_ref(), &self.options, &self.file_path)?;

        let mode = self.mode();
        let global = match mode {
            WriteMode::SingleFile => {
                let output = self.single_file_output();
                let handle = self.writer.initialize_global(&output, &self.file_schema)?;
                let name = path::non_tmp_file(&output);
                GlobalWriteState::new(Some(handle), vec![name.to_string_lossy().to_string()])
            }
            WriteMode::Rotate => {
                let global = GlobalWriteState::new(None, Vec::new());
                let handle = global.create_file_state(self)?;
                global.set_active(handle);
                global
            }
            WriteMode::PerThread | WriteMode::Partitioned => {
                GlobalWriteState::new(None, Vec::new())
            }
        };

        info!(
            path = %self.file_path.display(),
            mode = ?mode,
            extension = %self.extension,
            "Initialized copy target"
        );
        Ok(global)
    }

    pub fn local_state(&self, global: &GlobalWriteState<W>) -> Result<LocalWriteState<W>> {
        let local = match self.mode() {
            // Each flushed group gets a fresh writer local
            WriteMode::Partitioned => None,
            _ => Some(self.writer.initialize_local()?),
        };
        global.register_local();
        Ok(LocalWriteState::new(local))
    }

    pub fn sink(
        &self,
        global: &GlobalWriteState<W>,
        local: &mut LocalWriteState<W>,
        batch: &RecordBatch,
    ) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        global.add_rows(batch.num_rows());

        match self.mode() {
            WriteMode::Partitioned => local.append_to_partition(self, global, batch),
            WriteMode::PerThread => local.sink_per_thread(self, global, batch),
            WriteMode::Rotate => global.sink_rotating(self, local.local_mut()?, batch),
            WriteMode::SingleFile => {
                let handle = global.fixed()?;
                self.writer.sink(handle, local.local_mut()?, batch)
            }
        }
    }

    /// Merge a worker's remaining state; the local state is gone afterwards
    pub fn combine(&self, global: &GlobalWriteState<W>, mut local: LocalWriteState<W>) -> Result<()> {
        let result = match self.mode() {
            WriteMode::Partitioned => local.flush_partitions(self, global),
            WriteMode::PerThread => local.finish_per_thread(self),
            WriteMode::Rotate => local
                .local_mut()
                .and_then(|l| global.combine_rotating(self, l)),
            WriteMode::SingleFile => global
                .fixed()
                .and_then(|handle| self.writer.combine(handle, local.local_mut()?)),
        };
        global.release_local();
        result
    }

    /// Close every open file and report the summary
    pub fn finalize(&self, mut global: GlobalWriteState<W>) -> Result<CopySummary> {
        let outstanding = global.outstanding_locals();
        if outstanding > 0 {
            return Err(CopyError::WorkersOutstanding(outstanding));
        }

        match self.mode() {
            WriteMode::Partitioned => global.finalize_partitions(self)?,
            // Each worker closed its own files at combine
            WriteMode::PerThread => {}
            WriteMode::Rotate => {
                if let Some(handle) = global.take_active() {
                    self.writer.finalize(handle)?;
                }
            }
            WriteMode::SingleFile => {
                if let Some(handle) = global.take_fixed() {
                    self.writer.finalize(handle)?;
                }
                if self.options.uses_tmp_file() {
                    path::move_tmp_file(self.fs.as_ref(), &self.single_file_output())?;
                }
            }
        }

        let rows_written = global.rows_copied();
        let file_names = global.into_file_names();
        let summary = CopySummary {
            rows_written,
            file_paths: self.options.return_files.then_some(file_names),
        };
        info!(
            rows = summary.rows_written,
            files = summary.file_paths.as_ref().map(|f| f.len()),
            "Copy finished"
        );
        Ok(summary)
    }
}
