//! Job-wide write state shared by every worker.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use arrow::record_batch::RecordBatch;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::partition::PartitionKey;
use super::CopyToFile;
use crate::error::{CopyError, Result};
use crate::io::{FileSystem, Writer};

/// The open file of one distinct partition key
pub struct PartitionWriteInfo<G> {
    /// `None` once finalized
    global: Option<G>,
    directory: PathBuf,
    /// Offset of the next file in this partition's directory
    next_offset: u64,
}

#[cfg(test)]
impl<G> PartitionWriteInfo<G> {
    fn directory(&self) -> &Path {
        &self.directory
    }

    fn is_finalized(&self) -> bool {
        self.global.is_none()
    }
}

/// Everything guarded by the job-wide reader/writer lock
pub(crate) struct SharedState<G> {
    /// Current target of the shared rotating file
    active: Option<G>,
    partitions: HashMap<PartitionKey, PartitionWriteInfo<G>>,
    created_directories: HashSet<PathBuf>,
    file_names: Vec<String>,
}

impl<G> SharedState<G> {
    /// Create `dir` unless it was already handled by this job
    fn create_dir(&mut self, fs: &dyn FileSystem, dir: &Path) -> Result<()> {
        if self.created_directories.contains(dir) {
            return Ok(());
        }
        if !fs.directory_exists(dir) {
            fs.create_directory(dir)?;
        }
        self.created_directories.insert(dir.to_path_buf());
        Ok(())
    }

    /// Create `base/col1=val1/col2=val2/...` and return the leaf directory
    fn get_or_create_directory(
        &mut self,
        fs: &dyn FileSystem,
        names: &[String],
        key: &PartitionKey,
        base: &Path,
    ) -> Result<PathBuf> {
        let mut path = base.to_path_buf();
        self.create_dir(fs, &path)?;
        for (name, value) in names.iter().zip(key.values()) {
            let segment = format!("{}={}", name, value.path_segment());
            path = path.join(segment);
            self.create_dir(fs, &path)?;
        }
        Ok(path)
    }
}

pub struct GlobalWriteState<W: Writer> {
    rows_copied: AtomicU64,
    last_file_offset: AtomicU64,
    /// Local states handed out but not yet combined
    active_locals: AtomicUsize,
    /// The single file of a plain single-file job; never replaced, so never locked
    fixed: Option<W::Global>,
    state: RwLock<SharedState<W::Global>>,
}

impl<W: Writer> GlobalWriteState<W> {
    pub(crate) fn new(fixed: Option<W::Global>, file_names: Vec<String>) -> Self {
        Self {
            rows_copied: AtomicU64::new(0),
            last_file_offset: AtomicU64::new(0),
            active_locals: AtomicUsize::new(0),
            fixed,
            state: RwLock::new(SharedState {
                active: None,
                partitions: HashMap::new(),
                created_directories: HashSet::new(),
                file_names,
            }),
        }
    }

    pub fn rows_copied(&self) -> u64 {
        self.rows_copied.load(Ordering::Relaxed)
    }

    pub(crate) fn add_rows(&self, rows: usize) {
        self.rows_copied.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Produced file paths so far, in the order they were opened
    pub fn file_names(&self) -> Vec<String> {
        self.state.read().file_names.clone()
    }

    pub fn partition_count(&self) -> usize {
        self.state.read().partitions.len()
    }

    pub fn created_directory_count(&self) -> usize {
        self.state.read().created_directories.len()
    }

    pub(crate) fn register_local(&self) {
        self.active_locals.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release_local(&self) {
        self.active_locals.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn outstanding_locals(&self) -> usize {
        self.active_locals.load(Ordering::Acquire)
    }

    pub(crate) fn fixed(&self) -> Result<&W::Global> {
        self.fixed.as_ref().ok_or(CopyError::WriterUnavailable)
    }

    pub(crate) fn take_fixed(&mut self) -> Option<W::Global> {
        self.fixed.take()
    }

    pub(crate) fn set_active(&self, global: W::Global) {
        self.state.write().active = Some(global);
    }

    pub(crate) fn take_active(&mut self) -> Option<W::Global> {
        self.state.get_mut().active.take()
    }

    pub(crate) fn into_file_names(self) -> Vec<String> {
        self.state.into_inner().file_names
    }

    /// Idempotently create the hive directory of `key` below the target
    pub fn create_directory_path(&self, op: &CopyToFile<W>, key: &PartitionKey) -> Result<PathBuf> {
        let mut state = self.state.write();
        state.get_or_create_directory(op.fs.as_ref(), &op.partition_names, key, &op.file_path)
    }

    /// Open the next numbered file directly below the target
    pub(crate) fn create_file_state(&self, op: &CopyToFile<W>) -> Result<W::Global> {
        let (path, global) = self.open_next_file(op)?;
        if op.options.return_files {
            self.state.write().file_names.push(path);
        }
        Ok(global)
    }

    /// Same as `create_file_state` for callers already holding the exclusive lock
    fn create_file_state_locked(
        &self,
        op: &CopyToFile<W>,
        state: &mut SharedState<W::Global>,
    ) -> Result<W::Global> {
        let (path, global) = self.open_next_file(op)?;
        if op.options.return_files {
            state.file_names.push(path);
        }
        Ok(global)
    }

    fn open_next_file(&self, op: &CopyToFile<W>) -> Result<(String, W::Global)> {
        let offset = self.last_file_offset.fetch_add(1, Ordering::Relaxed);
        let path = op
            .pattern
            .create_filename(&op.file_path, &op.extension, offset);
        let global = op.writer.initialize_global(&path, &op.file_schema)?;
        debug!(path = %path.display(), offset, "Opened output file");
        Ok((path.to_string_lossy().to_string(), global))
    }

    /// Sink into the shared rotating file.
    ///
    /// The predicate and the write run under the shared lock; only the swap
    /// to a new file takes the exclusive lock, and the retired file is
    /// finalized after every lock is released.
    pub(crate) fn sink_rotating(
        &self,
        op: &CopyToFile<W>,
        local: &mut W::Local,
        batch: &RecordBatch,
    ) -> Result<()> {
        {
            let state = self.state.read();
            let active = state.active.as_ref().ok_or(CopyError::WriterUnavailable)?;
            if !op.writer.rotate_next_file(active, op.options.file_size_bytes) {
                return op.writer.sink(active, local, batch);
            }
        }

        let retired = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            // Another worker may have rotated while we waited for the lock
            let rotate = match state.active.as_ref() {
                Some(active) => op.writer.rotate_next_file(active, op.options.file_size_bytes),
                None => true,
            };
            if rotate {
                let next = self.create_file_state_locked(op, state)?;
                state.active.replace(next)
            } else {
                None
            }
        };

        if let Some(old) = retired {
            info!(offset = self.last_file_offset.load(Ordering::Relaxed), "Rotated to new output file");
            op.writer.finalize(old)?;
        }

        let state = self.state.read();
        let active = state.active.as_ref().ok_or(CopyError::WriterUnavailable)?;
        op.writer.sink(active, local, batch)
    }

    pub(crate) fn combine_rotating(&self, op: &CopyToFile<W>, local: &mut W::Local) -> Result<()> {
        // The active file may be swapped by a concurrent rotation
        let state = self.state.read();
        let active = state.active.as_ref().ok_or(CopyError::WriterUnavailable)?;
        op.writer.combine(active, local)
    }

    /// Find the entry of `key`, creating its directory and first file on a miss.
    ///
    /// Callers hold the exclusive lock for the whole check-then-create.
    fn get_or_create_partition_entry<'a>(
        &self,
        op: &CopyToFile<W>,
        state: &'a mut SharedState<W::Global>,
        key: &PartitionKey,
    ) -> Result<&'a mut PartitionWriteInfo<W::Global>> {
        if !state.partitions.contains_key(key) {
            let hive_path = state.get_or_create_directory(
                op.fs.as_ref(),
                &op.partition_names,
                key,
                &op.file_path,
            )?;
            let full_path = op.pattern.create_filename(&hive_path, &op.extension, 0);
            let global = op.writer.initialize_global(&full_path, &op.file_schema)?;
            if op.options.return_files {
                state
                    .file_names
                    .push(full_path.to_string_lossy().to_string());
            }
            debug!(path = %full_path.display(), "Created partition writer");
            state.partitions.insert(
                key.clone(),
                PartitionWriteInfo {
                    global: Some(global),
                    directory: hive_path,
                    next_offset: 1,
                },
            );
        }
        state
            .partitions
            .get_mut(key)
            .ok_or(CopyError::WriterUnavailable)
    }

    /// Write one flushed group of a worker's partition buffer.
    ///
    /// Runs entirely under the exclusive lock: flushes into the same key are
    /// serialized, and rotation inside the partition directory is checked
    /// before the group is written.
    pub(crate) fn write_partition(
        &self,
        op: &CopyToFile<W>,
        key: &PartitionKey,
        batches: &[RecordBatch],
    ) -> Result<()> {
        let retired = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            // A file opened for this flush is never rotated before its first write
            let existed = state.partitions.contains_key(key);
            let info = self.get_or_create_partition_entry(op, state, key)?;

            let mut opened = None;
            let mut retired = None;
            let rotate = match info.global.as_ref() {
                Some(current) => {
                    existed
                        && op.options.rotate()
                        && op.writer.rotate_next_file(current, op.options.file_size_bytes)
                }
                None => return Err(CopyError::WriterUnavailable),
            };
            if rotate {
                let path = op
                    .pattern
                    .create_filename(&info.directory, &op.extension, info.next_offset);
                info.next_offset += 1;
                let next = op.writer.initialize_global(&path, &op.file_schema)?;
                retired = info.global.replace(next);
                opened = Some(path);
            }

            let handle = info.global.as_ref().ok_or(CopyError::WriterUnavailable)?;
            let mut local = op.writer.initialize_local()?;
            for batch in batches {
                op.writer.sink(handle, &mut local, batch)?;
            }
            op.writer.combine(handle, &mut local)?;

            if let Some(path) = opened {
                info!(path = %path.display(), "Rotated partition to new output file");
                if op.options.return_files {
                    state.file_names.push(path.to_string_lossy().to_string());
                }
            }
            retired
        };

        if let Some(old) = retired {
            op.writer.finalize(old)?;
        }
        Ok(())
    }

    /// Finalize every partition file; entries already finalized are skipped
    pub fn finalize_partitions(&self, op: &CopyToFile<W>) -> Result<()> {
        let mut finalized = 0;
        {
            let mut state = self.state.write();
            for info in state.partitions.values_mut() {
                if let Some(global) = info.global.take() {
                    op.writer.finalize(global)?;
                    finalized += 1;
                }
            }
        }
        if finalized > 0 {
            info!(
                partitions = finalized,
                directories = self.created_directory_count(),
                "Finalized partition writers"
            );
        }
        Ok(())
    }
}
