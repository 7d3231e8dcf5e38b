//! Frame catalogs: newline-delimited lists of frame image paths
//!
//! Relative entries are resolved against the catalog's own directory, and
//! written catalogs store paths relative to it where possible.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct FrameCatalog {
    path: PathBuf,
    frames: Vec<PathBuf>,
}

impl FrameCatalog {
    /// Read a catalog; blank lines are skipped
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read frame catalog {:?}", path))?;
        let dir = catalog_dir(path);
        let frames: Vec<PathBuf> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| dir.join(line))
            .collect();
        if frames.is_empty() {
            bail!("Frame catalog {:?} lists no frames", path);
        }
        tracing::info!("Loaded {} frames from {:?}", frames.len(), path);
        Ok(Self {
            path: path.to_path_buf(),
            frames,
        })
    }

    pub fn new(path: PathBuf, frames: Vec<PathBuf>) -> Self {
        Self { path, frames }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frame path by 0-based index
    pub fn frame(&self, index: usize) -> Result<&Path> {
        self.frames
            .get(index)
            .map(PathBuf::as_path)
            .with_context(|| {
                format!(
                    "Frame {} is out of range, {:?} has {} frames",
                    index,
                    self.path,
                    self.frames.len()
                )
            })
    }

    /// Directory receiving the frames of a catalog written to this path,
    /// a sibling named after the catalog's stem
    pub fn frame_dir(&self) -> PathBuf {
        catalog_dir(&self.path).join(self.stem())
    }

    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "frames".to_string())
    }

    /// Write the catalog, creating its directory if needed
    pub fn write(&self) -> Result<()> {
        let dir = catalog_dir(&self.path);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create catalog directory {:?}", dir))?;

        let mut content = String::new();
        for frame in &self.frames {
            let entry = frame.strip_prefix(&dir).unwrap_or(frame);
            content.push_str(&entry.to_string_lossy().replace('\\', "/"));
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write frame catalog {:?}", self.path))?;
        tracing::info!("Wrote {} frames to {:?}", self.frames.len(), self.path);
        Ok(())
    }
}

fn catalog_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_resolves_relative_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.txt");
        std::fs::write(&path, "frames/a_00001.png\n\n  frames/a_00002.png \n/abs/x.png\n").unwrap();

        let catalog = FrameCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.frames()[0], dir.path().join("frames/a_00001.png"));
        assert_eq!(catalog.frames()[1], dir.path().join("frames/a_00002.png"));
        assert_eq!(catalog.frames()[2], PathBuf::from("/abs/x.png"));
        assert!(catalog.frame(3).is_err());
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "\n\n").unwrap();
        assert!(FrameCatalog::load(&path).is_err());
        assert!(FrameCatalog::load(&dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_write_stores_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("fixed.txt");
        let catalog = FrameCatalog::new(path.clone(), vec![]);
        let frames = vec![
            catalog.frame_dir().join("fixed_00001.png"),
            catalog.frame_dir().join("fixed_00002.png"),
        ];
        let catalog = FrameCatalog::new(path.clone(), frames.clone());
        catalog.write().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "fixed/fixed_00001.png\nfixed/fixed_00002.png\n");
        assert_eq!(FrameCatalog::load(&path).unwrap().frames(), frames.as_slice());
    }

    #[test]
    fn test_frame_dir_is_named_after_stem() {
        let catalog = FrameCatalog::new(PathBuf::from("/data/corrected.lst"), vec![]);
        assert_eq!(catalog.stem(), "corrected");
        assert_eq!(catalog.frame_dir(), PathBuf::from("/data/corrected"));
    }
}
