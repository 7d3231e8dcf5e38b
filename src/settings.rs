//! Per-catalog correction settings
//!
//! The model lives in a JSON sidecar next to the frame catalog
//! (`frames.txt` -> `frames.correct.json`).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::deshake::ShakeCorrectionMode;
use crate::geometry::{PerspectivePoints, Rect};

/// Extension replacing the catalog's own extension
pub const SETTING_EXTENSION: &str = "correct.json";

/// Correction state of one frame sequence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorrectionDataModel {
    /// Reference frame, 0-based
    pub base_frame_pos: Option<usize>,
    /// Frame currently inspected, 0-based
    pub sample_frame_pos: Option<usize>,
    pub shaking_detection_fields: Vec<Rect>,
    /// Manual rotation in degrees
    pub rotation_angle: Option<f64>,
    /// `None` until a sample frame has been seen
    pub perspective_coords: Option<PerspectivePoints>,
    /// Region written out after correction, whole frame when `None`
    pub clip: Option<Rect>,

    pub use_deshake_correction: bool,
    pub use_rotation_correction: bool,
    pub use_perspective_correction: bool,
    pub use_overlay: bool,
    pub use_nega: bool,
    pub use_grid: bool,
}

impl Default for CorrectionDataModel {
    fn default() -> Self {
        Self {
            base_frame_pos: None,
            sample_frame_pos: None,
            shaking_detection_fields: Vec::new(),
            rotation_angle: None,
            perspective_coords: None,
            clip: None,
            use_deshake_correction: true,
            use_rotation_correction: true,
            use_perspective_correction: true,
            use_overlay: false,
            use_nega: false,
            use_grid: false,
        }
    }
}

/// Model toggles addressable by name
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Toggle {
    Deshake,
    Rotation,
    Perspective,
    Overlay,
    Nega,
    Grid,
}

/// Sidecar path for a catalog
pub fn settings_path(catalog: &Path) -> PathBuf {
    catalog.with_extension(SETTING_EXTENSION)
}

impl CorrectionDataModel {
    /// Load the sidecar of `catalog`, or defaults when there is none
    pub fn load(catalog: &Path) -> Result<Self> {
        let path = settings_path(catalog);
        if !path.exists() {
            tracing::debug!("No settings at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        let model = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {:?}", path))?;
        tracing::info!("Loaded settings from {:?}", path);
        Ok(model)
    }

    /// Write the sidecar of `catalog`
    pub fn save(&self, catalog: &Path) -> Result<()> {
        let path = settings_path(catalog);
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write settings to {:?}", path))?;
        tracing::info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Numbered field list, `"1: (l, t)-(r, b)"`
    pub fn field_list(&self) -> Vec<String> {
        self.shaking_detection_fields
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}: {}", i + 1, f))
            .collect()
    }

    pub fn shake_correction_mode(&self) -> ShakeCorrectionMode {
        ShakeCorrectionMode::from_field_count(self.shaking_detection_fields.len())
    }

    /// Append a field; fields without area are refused
    pub fn add_field(&mut self, field: Rect) -> Result<()> {
        if field.is_empty() {
            bail!("Shake detection field {} has no area", field);
        }
        self.shaking_detection_fields.push(field);
        Ok(())
    }

    /// Remove the field with the 1-based number `n`
    pub fn remove_field(&mut self, n: usize) -> Result<Rect> {
        if n == 0 || n > self.shaking_detection_fields.len() {
            bail!(
                "No shake detection field {} (there are {})",
                n,
                self.shaking_detection_fields.len()
            );
        }
        Ok(self.shaking_detection_fields.remove(n - 1))
    }

    /// Point both frame positions at a valid frame of a `count` frame catalog
    pub fn sync_frame_positions(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if self.base_frame_pos.map_or(true, |p| p >= count) {
            self.base_frame_pos = Some(0);
        }
        if self.sample_frame_pos.map_or(true, |p| p >= count) {
            self.sample_frame_pos = self.base_frame_pos;
        }
    }

    /// Initialize the quad and clip to the full frame when unset
    pub fn ensure_frame_geometry(&mut self, width: u32, height: u32) {
        if self.perspective_coords.is_none() {
            self.perspective_coords = Some(PerspectivePoints::full_frame(width, height));
        }
        if self.clip.is_none() {
            self.clip = Some(Rect::full(width, height));
        }
    }

    pub fn set_toggle(&mut self, toggle: Toggle, on: bool) {
        let flag = match toggle {
            Toggle::Deshake => &mut self.use_deshake_correction,
            Toggle::Rotation => &mut self.use_rotation_correction,
            Toggle::Perspective => &mut self.use_perspective_correction,
            Toggle::Overlay => &mut self.use_overlay,
            Toggle::Nega => &mut self.use_nega,
            Toggle::Grid => &mut self.use_grid,
        };
        *flag = on;
    }

    /// Fields fed to the tracker, none when deshaking is off
    pub fn active_fields(&self) -> &[Rect] {
        if self.use_deshake_correction {
            &self.shaking_detection_fields
        } else {
            &[]
        }
    }

    /// Rotation applied, zero when rotation correction is off
    pub fn effective_rotation(&self) -> f64 {
        if self.use_rotation_correction {
            self.rotation_angle.unwrap_or(0.0)
        } else {
            0.0
        }
    }

    /// Quad applied, `None` when perspective correction is off
    pub fn effective_perspective(&self) -> Option<&PerspectivePoints> {
        if self.use_perspective_correction {
            self.perspective_coords.as_ref()
        } else {
            None
        }
    }
}
