//! Worker-private write state.

use arrow::record_batch::RecordBatch;
use tracing::debug;

use super::global::GlobalWriteState;
use super::partition::HivePartitioner;
use super::CopyToFile;
use crate::error::{CopyError, Result};
use crate::io::Writer;

/// State owned by exactly one worker between Sink calls
pub struct LocalWriteState<W: Writer> {
    pub(crate) local: Option<W::Local>,
    /// The worker's own open file in per-thread mode
    pub(crate) global: Option<W::Global>,
    part_buffer: Option<HivePartitioner>,
    append_count: usize,
}

impl<W: Writer> LocalWriteState<W> {
    pub(crate) fn new(local: Option<W::Local>) -> Self {
        Self {
            local,
            global: None,
            part_buffer: None,
            append_count: 0,
        }
    }

    /// Rows appended to the partition buffer since its last flush
    pub fn buffered_rows(&self) -> usize {
        self.append_count
    }

    pub(crate) fn local_mut(&mut self) -> Result<&mut W::Local> {
        self.local.as_mut().ok_or(CopyError::WriterUnavailable)
    }

    /// Buffer `batch` by partition key, flushing once the threshold is reached
    pub(crate) fn append_to_partition(
        &mut self,
        op: &CopyToFile<W>,
        global: &GlobalWriteState<W>,
        batch: &RecordBatch,
    ) -> Result<()> {
        let buffer = self.part_buffer.get_or_insert_with(|| {
            HivePartitioner::new(op.partition_columns.clone(), op.projection.clone())
        });
        buffer.append(batch)?;
        self.append_count += batch.num_rows();
        if self.append_count >= op.options.partitioned_write_flush_threshold {
            self.flush_partitions(op, global)?;
        }
        Ok(())
    }

    /// Hand every buffered group to its partition file, then reset the buffer
    pub(crate) fn flush_partitions(
        &mut self,
        op: &CopyToFile<W>,
        global: &GlobalWriteState<W>,
    ) -> Result<()> {
        let Some(mut buffer) = self.part_buffer.take() else {
            return Ok(());
        };
        self.append_count = 0;
        if buffer.is_empty() {
            return Ok(());
        }
        let rows = buffer.buffered_rows();
        let groups = buffer.flush();
        debug!(groups = groups.len(), rows, "Flushing partition buffer");
        for (key, batches) in groups {
            if batches.iter().all(|b| b.num_rows() == 0) {
                continue;
            }
            global.write_partition(op, &key, &batches)?;
        }
        Ok(())
    }

    /// Sink into this worker's own file, opening or rotating it as needed
    pub(crate) fn sink_per_thread(
        &mut self,
        op: &CopyToFile<W>,
        global: &GlobalWriteState<W>,
        batch: &RecordBatch,
    ) -> Result<()> {
        let local = self.local.as_mut().ok_or(CopyError::WriterUnavailable)?;

        if self.global.is_none() {
            self.global = Some(global.create_file_state(op)?);
        } else if op.options.rotate() {
            let rotate = match self.global.as_ref() {
                Some(current) => op
                    .writer
                    .rotate_next_file(current, op.options.file_size_bytes),
                None => false,
            };
            if rotate {
                if let Some(old) = self.global.take() {
                    op.writer.combine(&old, local)?;
                    op.writer.finalize(old)?;
                }
                self.global = Some(global.create_file_state(op)?);
            }
        }

        let handle = self.global.as_ref().ok_or(CopyError::WriterUnavailable)?;
        op.writer.sink(handle, local, batch)
    }

    /// Combine and close this worker's own file
    pub(crate) fn finish_per_thread(&mut self, op: &CopyToFile<W>) -> Result<()> {
        let Some(handle) = self.global.take() else {
            // The worker never received a row
            return Ok(());
        };
        let local = self.local.as_mut().ok_or(CopyError::WriterUnavailable)?;
        op.writer.combine(&handle, local)?;
        op.writer.finalize(handle)
    }
}
