use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use arrow::record_batch::RecordBatch;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{FormatKind, JobConfig};
use crate::copy::{CopySummary, CopyToFile, GlobalWriteState};
use crate::error::{CopyError, Result};
use crate::io::{JsonlWriter, ParquetWriter, ReaderFactory, Writer};

/// Run a job end to end: read the source, copy it, return the summary
pub fn run_job(config: &JobConfig) -> anyhow::Result<CopySummary> {
    info!(job = %config.name, target = %config.copy.path, "Running copy job");

    let reader = ReaderFactory::create(&config.source)
        .with_context(|| format!("Failed to open source for job '{}'", config.name))?;
    let schema = reader.schema().clone();
    let threads = config.threads.unwrap_or_else(rayon::current_num_threads);

    let summary = match config.copy.format {
        FormatKind::Parquet => {
            let op = CopyToFile::try_new(ParquetWriter::new(), config.copy.clone(), schema)?;
            run_copy(&op, reader, threads)
        }
        FormatKind::Jsonl => {
            let op = CopyToFile::try_new(JsonlWriter::new(), config.copy.clone(), schema)?;
            run_copy(&op, reader, threads)
        }
    }
    .with_context(|| format!("Copy job '{}' failed", config.name))?;

    Ok(summary)
}

/// Drive the full lifecycle with `threads` workers pulling from `source`.
///
/// Each worker owns one local state, sinks batches until the source is
/// exhausted, then combines. Finalize runs once after every worker is done.
pub fn run_copy<W, I>(op: &CopyToFile<W>, source: I, threads: usize) -> Result<CopySummary>
where
    W: Writer,
    I: Iterator<Item = Result<RecordBatch>> + Send,
{
    let threads = threads.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| CopyError::InvalidOptions(format!("worker pool: {}", e)))?;

    let global = op.initialize_global()?;

    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} batches {msg}")
    {
        pb.set_style(style);
    }

    let source = Mutex::new(source);
    let failed = AtomicBool::new(false);

    pool.install(|| {
        (0..threads)
            .into_par_iter()
            .try_for_each(|worker| run_worker(op, &global, &source, &failed, &pb, worker))
    })?;

    pb.finish_with_message("done");
    op.finalize(global)
}

/// Copy in-memory batches, mainly for tests and embedding
pub fn copy_batches<W: Writer>(
    op: &CopyToFile<W>,
    batches: Vec<RecordBatch>,
    threads: usize,
) -> Result<CopySummary> {
    run_copy(op, batches.into_iter().map(Ok), threads)
}

fn run_worker<W, I>(
    op: &CopyToFile<W>,
    global: &GlobalWriteState<W>,
    source: &Mutex<I>,
    failed: &AtomicBool,
    pb: &ProgressBar,
    worker: usize,
) -> Result<()>
where
    W: Writer,
    I: Iterator<Item = Result<RecordBatch>> + Send,
{
    let mut local = op.local_state(global)?;
    let mut batches = 0usize;

    loop {
        if failed.load(Ordering::Relaxed) {
            break;
        }
        // Hold the source lock only while pulling
        let next = source.lock().next();
        let batch = match next {
            Some(Ok(batch)) => batch,
            Some(Err(e)) => {
                failed.store(true, Ordering::Relaxed);
                return Err(e);
            }
            None => break,
        };
        if let Err(e) = op.sink(global, &mut local, &batch) {
            failed.store(true, Ordering::Relaxed);
            return Err(e);
        }
        batches += 1;
        pb.inc(1);
    }

    debug!(worker, batches, "Worker drained source");
    op.combine(global, local)
}
