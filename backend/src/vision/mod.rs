pub mod cascade;

pub use cascade::{DetectionParams, HaarCascade};

use image::GrayImage;
use shared::BoundingBox;
use std::path::{Path, PathBuf};

/// A detected face in original-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Shrinks the region so it lies inside a `width` x `height` image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Region {
        let x = self.x.min(width.saturating_sub(1));
        let y = self.y.min(height.saturating_sub(1));
        Region {
            x,
            y,
            width: self.width.min(width - x).max(1),
            height: self.height.min(height - y).max(1),
        }
    }
}

impl From<Region> for BoundingBox {
    fn from(region: Region) -> Self {
        BoundingBox {
            x: region.x,
            y: region.y,
            width: region.width,
            height: region.height,
        }
    }
}

pub trait FaceDetector: Send + Sync {
    /// Face regions in detection order.
    fn detect(&self, gray: &GrayImage) -> Vec<Region>;
}

/// First existing candidate, or the last one (the bundled default) when none
/// of the preferred locations exist.
pub fn locate_cascade(candidates: &[PathBuf]) -> Option<&Path> {
    let (bundled, preferred) = candidates.split_last()?;
    match preferred.iter().find(|path| path.exists()) {
        Some(path) => Some(path.as_path()),
        None => {
            log::warn!(
                "No cascade file found in model locations, using bundled default {}",
                bundled.display()
            );
            Some(bundled.as_path())
        }
    }
}
