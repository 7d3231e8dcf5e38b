//! Batch correction of a whole frame catalog
//!
//! Frames are corrected on a fixed-size rayon pool against the shared base
//! frame and settings. Results are collected by frame index and written in
//! source order once the pool drains. Progress is reported over a bounded
//! channel; a shared flag stops new frames from starting.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::FrameCatalog;
use crate::config::OutputFormat;
use crate::deshake::{compose_with_perspective, estimate_correction};
use crate::imaging::{Frame, GrayF32};
use crate::settings::CorrectionDataModel;

/// One batch correction run
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub input: FrameCatalog,
    /// Catalog to write; frames go to the sibling directory named after it
    pub output: PathBuf,
    pub model: CorrectionDataModel,
    pub workers: usize,
    pub format: OutputFormat,
}

/// Progress messages sent to the consumer of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started { total: usize },
    Progress { done: usize, total: usize },
    Finished {
        written: usize,
        failed: usize,
        cancelled: bool,
    },
}

#[derive(Debug, Clone)]
pub struct FrameFailure {
    /// 0-based frame index
    pub index: usize,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub total: usize,
    /// Corrected frames in source order
    pub written: Vec<PathBuf>,
    pub failures: Vec<FrameFailure>,
    pub cancelled: bool,
}

/// Shared read-only state of a run
struct FrameContext<'a> {
    base_gray: GrayF32,
    base_size: (u32, u32),
    model: &'a CorrectionDataModel,
    frame_dir: PathBuf,
    stem: String,
    format: OutputFormat,
}

/// Correct every frame of `job.input` and write `job.output`
///
/// Failing frames are skipped and reported together. When `cancel` is set,
/// frames already running finish, the rest are not started and nothing is
/// kept.
pub fn run_batch(
    job: &BatchJob,
    cancel: &AtomicBool,
    events: &mpsc::Sender<BatchEvent>,
) -> Result<BatchSummary> {
    if job.input.is_empty() {
        bail!("Frame catalog {:?} lists no frames", job.input.path());
    }
    let total = job.input.len();
    let mut model = job.model.clone();
    model.sync_frame_positions(total);

    let base_index = model.base_frame_pos.unwrap_or(0);
    let base_path = job.input.frame(base_index)?;
    let base = Frame::open(base_path).context("Failed to load the base frame")?;

    let output = FrameCatalog::new(job.output.clone(), Vec::new());
    let frame_dir = output.frame_dir();
    std::fs::create_dir_all(&frame_dir)
        .with_context(|| format!("Failed to create output directory {:?}", frame_dir))?;

    let ctx = FrameContext {
        base_gray: base.to_gray(),
        base_size: base.dimensions(),
        model: &model,
        frame_dir,
        stem: output.stem(),
        format: job.format,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(job.workers.max(1))
        .thread_name(|i| format!("correct-{}", i))
        .build()
        .context("Failed to create worker pool")?;

    info!(
        frames = total,
        workers = job.workers,
        mode = ?model.shake_correction_mode(),
        "Starting batch correction"
    );
    let _ = events.blocking_send(BatchEvent::Started { total });

    let results: Mutex<BTreeMap<usize, PathBuf>> = Mutex::new(BTreeMap::new());
    let failures: Mutex<Vec<FrameFailure>> = Mutex::new(Vec::new());
    let done = AtomicUsize::new(0);

    pool.scope(|s| {
        for (index, path) in job.input.frames().iter().enumerate() {
            let (ctx, results, failures, done) = (&ctx, &results, &failures, &done);
            s.spawn(move |_| {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                match correct_frame(index, path, ctx) {
                    Ok(out) => {
                        results.lock().insert(index, out);
                    }
                    Err(e) => {
                        warn!(frame = index + 1, "Skipping {:?}: {:#}", path, e);
                        failures.lock().push(FrameFailure {
                            index,
                            path: path.clone(),
                            error: format!("{:#}", e),
                        });
                    }
                }
                let done = done.fetch_add(1, Ordering::Relaxed) + 1;
                let _ = events.blocking_send(BatchEvent::Progress { done, total });
            });
        }
    });

    let written: Vec<PathBuf> = results.into_inner().into_values().collect();
    let mut failures = failures.into_inner();
    failures.sort_by_key(|f| f.index);

    if cancel.load(Ordering::Relaxed) {
        for path in &written {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {:?}: {}", path, e);
            }
        }
        info!("Batch correction cancelled, discarded {} frames", written.len());
        let _ = events.blocking_send(BatchEvent::Finished {
            written: 0,
            failed: failures.len(),
            cancelled: true,
        });
        return Ok(BatchSummary {
            total,
            written: Vec::new(),
            failures,
            cancelled: true,
        });
    }

    FrameCatalog::new(job.output.clone(), written.clone()).write()?;

    if !failures.is_empty() {
        warn!(
            "Some files failed: {} of {} frames could not be corrected",
            failures.len(),
            total
        );
    }
    info!(written = written.len(), "Batch correction finished");
    let _ = events.blocking_send(BatchEvent::Finished {
        written: written.len(),
        failed: failures.len(),
        cancelled: false,
    });

    Ok(BatchSummary {
        total,
        written,
        failures,
        cancelled: false,
    })
}

/// Deshake, rotate, straighten and clip one frame, then save it
fn correct_frame(index: usize, path: &Path, ctx: &FrameContext<'_>) -> Result<PathBuf> {
    let frame = Frame::open(path)?;
    if frame.dimensions() != ctx.base_size {
        bail!(
            "Frame is {:?} but the base frame is {:?}",
            frame.dimensions(),
            ctx.base_size
        );
    }

    let estimate = estimate_correction(
        &ctx.base_gray,
        &frame.to_gray(),
        ctx.model.active_fields(),
        ctx.model.effective_rotation(),
    )?;
    let matrix = compose_with_perspective(&estimate.matrix, ctx.model.effective_perspective());

    let corrected = frame.warp(&matrix);
    let corrected = match &ctx.model.clip {
        Some(clip) => corrected.crop(clip)?,
        None => corrected,
    };

    let out = ctx.frame_dir.join(format!(
        "{}_{:05}.{}",
        ctx.stem,
        index + 1,
        ctx.format.extension()
    ));
    corrected.save(&out)?;
    if let Some(rigid) = &estimate.rigid {
        debug!(
            frame = index + 1,
            angle = rigid.angle,
            dx = rigid.translation.x,
            dy = rigid.translation.y,
            rms = rigid.rms_error,
            "Corrected frame"
        );
    }
    Ok(out)
}
