use anyhow::{anyhow, Result};
use image::{imageops::FilterType, GrayImage};
use serde::{Deserialize, Serialize};
use shared::config::DetectorConfig;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::observability::metrics;

/// Axis-aligned box `(x1, y1)`–`(x2, y2)` in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }

    /// Grows the box by `margin` times its size on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        let mx = self.width() * margin;
        let my = self.height() * margin;
        Self::new(self.x1 - mx, self.y1 - my, self.x2 + mx, self.y2 + my)
    }

    /// Integer crop `(x, y, w, h)` clamped to a `width x height` image;
    /// `None` when nothing of the box lies inside.
    pub fn to_crop(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x1 = self.x1.floor().clamp(0.0, width as f32) as u32;
        let y1 = self.y1.floor().clamp(0.0, height as f32) as u32;
        let x2 = self.x2.ceil().clamp(0.0, width as f32) as u32;
        let y2 = self.y2.ceil().clamp(0.0, height as f32) as u32;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

/// Candidate QR code location, immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRegion {
    /// In the coordinate space of the image passed to `RegionDetector::detect`.
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// Scale factor the localizer ran at.
    pub scale: f32,
    pub source_size: (u32, u32),
}

/// Raw output of a localization backend, in the coordinates of the image it saw.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedCode {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// QR localization capability: image in, zero or more candidate boxes out.
pub trait QrLocator: Send + Sync {
    fn name(&self) -> &'static str;
    fn locate(&self, image: &GrayImage) -> Result<Vec<LocatedCode>>;
}

/// Localizer backed by rqrr's capstone/grid search.
#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrLocator;

impl QrLocator for RqrrLocator {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn locate(&self, image: &GrayImage) -> Result<Vec<LocatedCode>> {
        let mut prepared = rqrr::PreparedImage::prepare(image.clone());
        let grids = prepared.detect_grids();

        Ok(grids
            .iter()
            .map(|grid| {
                let xs = grid.bounds.iter().map(|p| p.x as f32);
                let ys = grid.bounds.iter().map(|p| p.y as f32);
                let (x1, x2) = xs.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
                let (y1, y2) = ys.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
                // rqrr reports geometry only; a located grid counts as certain.
                LocatedCode {
                    bbox: BoundingBox::new(x1, y1, x2, y2),
                    confidence: 1.0,
                }
            })
            .collect())
    }
}

/// Runs a third-party image routine, turning a panic into an error.
pub(crate) fn guarded<T>(stage: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => Err(anyhow!("{} panicked", stage)),
    }
}

/// Multi-scale, optionally windowed, QR localization.
#[derive(Clone)]
pub struct RegionDetector {
    locator: Arc<dyn QrLocator>,
    scales: Vec<f32>,
    zoom_window: Option<f32>,
}

impl RegionDetector {
    /// Scale 1.0 is always attempted first; repeated or non-positive scales
    /// are dropped.
    pub fn new(locator: Arc<dyn QrLocator>, config: &DetectorConfig) -> Self {
        let mut scales = vec![1.0f32];
        for &scale in &config.scales {
            if scale.is_finite() && scale > 0.0 && !scales.iter().any(|s| (s - scale).abs() < 1e-6) {
                scales.push(scale);
            }
        }

        Self {
            locator,
            scales,
            zoom_window: config.zoom_window.filter(|w| *w > 0.0 && *w < 1.0),
        }
    }

    pub fn scales(&self) -> &[f32] {
        &self.scales
    }

    pub fn zoom_window(&self) -> Option<f32> {
        self.zoom_window
    }

    /// Candidate regions in `image` coordinates. Result order is unspecified.
    pub fn detect(&self, image: &GrayImage) -> Vec<DetectionRegion> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Vec::new();
        }

        let regions = match self.zoom_rect(width, height) {
            Some((x, y, w, h)) => {
                let window = image::imageops::crop_imm(image, x, y, w, h).to_image();
                self.detect_all_scales(&window)
                    .into_iter()
                    .map(|region| DetectionRegion {
                        bbox: region.bbox.translated(x as f32, y as f32),
                        source_size: (width, height),
                        ..region
                    })
                    .collect()
            }
            None => self.detect_all_scales(image),
        };

        metrics::REGIONS_DETECTED_TOTAL.inc_by(regions.len() as u64);
        regions
    }

    fn detect_all_scales(&self, image: &GrayImage) -> Vec<DetectionRegion> {
        let mut regions = Vec::new();
        for &scale in &self.scales {
            match self.detect_at_scale(image, scale) {
                Ok(found) => regions.extend(found),
                Err(e) => {
                    // One bad scale never aborts the others.
                    warn!("⚠️ {} failed at scale {:.2}: {}", self.locator.name(), scale, e);
                    metrics::DETECTION_FAILURES_TOTAL.inc();
                }
            }
        }
        regions
    }

    fn detect_at_scale(&self, image: &GrayImage, scale: f32) -> Result<Vec<DetectionRegion>> {
        let (width, height) = image.dimensions();
        let source_size = (width, height);

        let located = if (scale - 1.0).abs() < f32::EPSILON {
            guarded(self.locator.name(), || self.locator.locate(image))?
        } else {
            let scaled_w = (width as f32 * scale).round() as u32;
            let scaled_h = (height as f32 * scale).round() as u32;
            if scaled_w == 0 || scaled_h == 0 {
                return Err(anyhow!("scale {} collapses a {}x{} image", scale, width, height));
            }
            let resized = image::imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
            let sx = width as f32 / scaled_w as f32;
            let sy = height as f32 / scaled_h as f32;
            guarded(self.locator.name(), || self.locator.locate(&resized))?
                .into_iter()
                .map(|code| LocatedCode {
                    bbox: code.bbox.scaled(sx, sy),
                    ..code
                })
                .collect()
        };

        debug!("🔍 scale {:.2}: {} candidate(s)", scale, located.len());

        Ok(located
            .into_iter()
            .map(|code| DetectionRegion {
                bbox: code.bbox,
                confidence: code.confidence.clamp(0.0, 1.0),
                scale,
                source_size,
            })
            .collect())
    }

    fn zoom_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let fraction = self.zoom_window?;
        let w = ((width as f32 * fraction).round() as u32).clamp(1, width);
        let h = ((height as f32 * fraction).round() as u32).clamp(1, height);
        Some(((width - w) / 2, (height - h) / 2, w, h))
    }
}
