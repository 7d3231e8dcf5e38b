//! railpano - Deshaking and perspective correction for railway panoramas
//!
//! Aligns every frame of a frame catalog to a reference frame by tracking
//! user-marked fields of static scenery, applies the manual rotation and the
//! perspective correction, clips and writes the corrected sequence. Also
//! re-cuts the aspect ratio of finished stitched panoramas.

mod adjust;
mod batch;
mod catalog;
mod config;
mod deshake;
mod geometry;
mod imaging;
mod phase;
mod preview;
mod rigid;
mod settings;
#[cfg(test)]
mod testing;
mod transform;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use nalgebra::Matrix3;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::batch::{BatchEvent, BatchJob};
use crate::catalog::FrameCatalog;
use crate::deshake::{compose_with_perspective, DeshakingCorrection};
use crate::geometry::{Corner, Rect};
use crate::imaging::Frame;
use crate::settings::{CorrectionDataModel, Toggle};

/// Capacity of the batch progress channel
const EVENT_QUEUE: usize = 64;

/// railpano - Railway panorama frame correction
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "railpano.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute the correction of the sample frame and print diagnostics
    Inspect {
        /// Frame catalog
        catalog: PathBuf,

        /// Write a preview of the corrected sample frame
        #[arg(long)]
        preview: Option<PathBuf>,
    },

    /// Correct every frame of a catalog
    Correct {
        /// Frame catalog
        catalog: PathBuf,

        /// Output catalog; frames go to a sibling directory named after it
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show or edit the correction settings of a catalog
    Settings {
        /// Frame catalog
        catalog: PathBuf,

        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Re-cut the aspect ratio of a stitched panorama
    Adjust {
        /// Stitched image
        image: PathBuf,

        /// Measurement dataset (series-700-e, doctor-yellow)
        #[arg(long)]
        train: String,

        /// Roof row
        #[arg(long)]
        y_top: u32,

        /// Ground row
        #[arg(long)]
        y_bottom: u32,

        /// X of every car boundary, comma separated, left to right
        #[arg(long, value_delimiter = ',', required = true)]
        positions: Vec<u32>,

        /// Correction factor (dataset default when omitted)
        #[arg(long)]
        factor: Option<f64>,

        /// Unscaled side margin in pixels
        #[arg(long)]
        margin: Option<u32>,

        /// Unsharp mask strength, 0 disables it
        #[arg(long)]
        unsharp: Option<f32>,

        /// Output image
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    /// Print the settings
    Show,
    /// Set the base (reference) frame, 0-based
    Base { index: usize },
    /// Set the sample frame, 0-based
    Sample { index: usize },
    /// Add a shake detection field
    AddField {
        left: i32,
        top: i32,
        right: i32,
        bottom: i32,
    },
    /// Remove a shake detection field by its 1-based number
    RemoveField { number: usize },
    /// Set the manual rotation in degrees
    Rotation {
        #[arg(allow_hyphen_values = true)]
        degrees: f64,
    },
    /// Drag a corner of the perspective quad
    Perspective { corner: Corner, x: i32, y: i32 },
    /// Drag a corner of the clip region
    Clip { corner: Corner, x: i32, y: i32 },
    /// Switch a correction stage or preview option
    Toggle { name: Toggle, state: Switch },
    /// Restore the defaults
    Reset,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_target(false).compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(log_level).init(),
    }

    info!("railpano v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Inspect { catalog, preview } => inspect(&catalog, preview.as_deref()),
        Command::Correct { catalog, output } => correct(&args.config, catalog, output).await,
        Command::Settings { catalog, action } => edit_settings(&catalog, action),
        Command::Adjust {
            image,
            train,
            y_top,
            y_bottom,
            positions,
            factor,
            margin,
            unsharp,
            output,
        } => {
            let config = config::Config::load_or_create(&args.config)?;
            let data = adjust::find_dataset(&train)?;
            let params = adjust::AdjustParams {
                y_top,
                y_bottom,
                positions,
                factor: factor.unwrap_or(data.factor),
                margin: margin.unwrap_or(config.adjust.margin),
                unsharp: unsharp.unwrap_or(config.adjust.unsharp),
            };
            let src = image::open(&image)
                .with_context(|| format!("Failed to read image {:?}", image))?
                .to_rgb8();
            let adjusted = adjust::adjust_aspect(&src, &data, &params)?;
            adjusted
                .image
                .save(&output)
                .with_context(|| format!("Failed to write image {:?}", output))?;
            info!(
                "Adjusted {}x{} to {}x{}, saved {:?}",
                src.width(),
                src.height(),
                adjusted.image.width(),
                adjusted.height,
                output
            );
            debug!(widths = ?adjusted.dst_widths, "Car segment widths");
            Ok(())
        }
    }
}

fn inspect(catalog_path: &Path, preview: Option<&Path>) -> Result<()> {
    let catalog = FrameCatalog::load(catalog_path)?;
    let mut model = CorrectionDataModel::load(catalog_path)?;
    model.sync_frame_positions(catalog.len());
    let base_index = model.base_frame_pos.unwrap_or(0);
    let sample_index = model.sample_frame_pos.unwrap_or(base_index);

    let mut session = DeshakingCorrection::new();
    session.set_base_image(Frame::open(catalog.frame(base_index)?)?);
    let sample = Frame::open(catalog.frame(sample_index)?)?;
    let (width, height) = sample.dimensions();
    session.set_sample_image(sample, Some(sample_index));
    model.ensure_frame_geometry(width, height);

    info!(
        base = base_index,
        sample = sample_index,
        fields = model.active_fields().len(),
        "{}",
        model.shake_correction_mode().describe()
    );

    let deshake = {
        let mut sink = std::io::stdout().lock();
        session.compute(model.active_fields(), model.effective_rotation(), &mut sink)?
    };
    let matrix = compose_with_perspective(&deshake, model.effective_perspective());
    println!("{}", format_matrix(&matrix));

    if let Some(path) = preview {
        let (Some(base), Some(sample)) = (session.base_image(), session.sample_image()) else {
            anyhow::bail!("No base image or sample image");
        };
        let corrected = sample.warp(&matrix);
        preview::render_preview(base, &corrected, &model)
            .save(path)
            .with_context(|| format!("Failed to write preview {:?}", path))?;
        info!("Saved preview to {:?}", path);
    }
    Ok(())
}

async fn correct(config_path: &Path, catalog_path: PathBuf, output: PathBuf) -> Result<()> {
    let config = config::Config::load_or_create(config_path)?;
    let input = FrameCatalog::load(&catalog_path)?;
    let model = CorrectionDataModel::load(&catalog_path)?;
    info!("{}", model.shake_correction_mode().describe());

    let job = BatchJob {
        input,
        output: output.clone(),
        model,
        workers: config.batch.worker_count(),
        format: config.batch.output_format,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let signal_flag = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing frames in flight");
            signal_flag.store(true, Ordering::SeqCst);
        }
    });

    let (tx, mut rx) = mpsc::channel(EVENT_QUEUE);
    let batch_flag = cancel.clone();
    let handle =
        tokio::task::spawn_blocking(move || batch::run_batch(&job, &batch_flag, &tx));

    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::Started { total } => info!("Correcting {} frames", total),
            BatchEvent::Progress { done, total } => {
                if done == total || done % 50 == 0 {
                    info!("Corrected {}/{} frames", done, total);
                }
            }
            BatchEvent::Finished {
                written,
                failed,
                cancelled,
            } => info!(written, failed, cancelled, "Batch finished"),
        }
    }

    let summary = handle.await.context("Batch task panicked")??;
    signal_task.abort();

    if summary.cancelled {
        warn!("Batch correction cancelled, no catalog written");
        return Ok(());
    }
    for failure in &summary.failures {
        warn!("Frame {} ({:?}): {}", failure.index + 1, failure.path, failure.error);
    }
    info!(
        "Wrote {} of {} frames, catalog {:?}",
        summary.written.len(),
        summary.total,
        output
    );
    Ok(())
}

fn edit_settings(catalog_path: &Path, action: SettingsAction) -> Result<()> {
    let mut model = CorrectionDataModel::load(catalog_path)?;

    match action {
        SettingsAction::Show => {
            print_settings(&model);
            return Ok(());
        }
        SettingsAction::Base { index } => model.base_frame_pos = Some(index),
        SettingsAction::Sample { index } => model.sample_frame_pos = Some(index),
        SettingsAction::AddField {
            left,
            top,
            right,
            bottom,
        } => model.add_field(Rect::new(left, top, right, bottom))?,
        SettingsAction::RemoveField { number } => {
            let removed = model.remove_field(number)?;
            info!("Removed field {}", removed);
        }
        SettingsAction::Rotation { degrees } => model.rotation_angle = Some(degrees),
        SettingsAction::Perspective { corner, x, y } => {
            let (width, height) = frame_size(catalog_path, &mut model)?;
            if let Some(points) = model.perspective_coords.as_mut() {
                points.drag_corner(corner, x, y, width, height);
            }
        }
        SettingsAction::Clip { corner, x, y } => {
            let (width, height) = frame_size(catalog_path, &mut model)?;
            if let Some(clip) = model.clip.as_mut() {
                clip.drag_corner(corner, x, y, width, height);
            }
        }
        SettingsAction::Toggle { name, state } => {
            model.set_toggle(name, matches!(state, Switch::On))
        }
        SettingsAction::Reset => model = CorrectionDataModel::default(),
    }

    model.save(catalog_path)?;
    print_settings(&model);
    Ok(())
}

/// Size of the sample frame, initializing the quad and clip to it
fn frame_size(catalog_path: &Path, model: &mut CorrectionDataModel) -> Result<(u32, u32)> {
    let catalog = FrameCatalog::load(catalog_path)?;
    model.sync_frame_positions(catalog.len());
    let path = catalog.frame(model.sample_frame_pos.unwrap_or(0))?;
    let size = image::image_dimensions(path)
        .with_context(|| format!("Failed to read image size of {:?}", path))?;
    model.ensure_frame_geometry(size.0, size.1);
    Ok(size)
}

fn print_settings(model: &CorrectionDataModel) {
    let or_unset = |v: Option<String>| v.unwrap_or_else(|| "unset".to_string());
    println!("base frame:   {}", or_unset(model.base_frame_pos.map(|p| p.to_string())));
    println!("sample frame: {}", or_unset(model.sample_frame_pos.map(|p| p.to_string())));
    println!("rotation:     {}", or_unset(model.rotation_angle.map(|a| format!("{:.2}", a))));
    println!("perspective:  {}", or_unset(model.perspective_coords.map(|p| p.to_string())));
    println!("clip:         {}", or_unset(model.clip.map(|c| c.to_string())));
    println!("fields:");
    for line in model.field_list() {
        println!("  {}", line);
    }
    println!("{}", model.shake_correction_mode().describe());
    let toggles = [
        ("deshake", model.use_deshake_correction),
        ("rotation", model.use_rotation_correction),
        ("perspective", model.use_perspective_correction),
        ("overlay", model.use_overlay),
        ("nega", model.use_nega),
        ("grid", model.use_grid),
    ];
    for (name, on) in toggles {
        println!("{:<12} {}", name, if on { "on" } else { "off" });
    }
}

fn format_matrix(m: &Matrix3<f64>) -> String {
    (0..3)
        .map(|r| format!("[{:>12.6} {:>12.6} {:>12.6}]", m[(r, 0)], m[(r, 1)], m[(r, 2)]))
        .collect::<Vec<_>>()
        .join("\n")
}
