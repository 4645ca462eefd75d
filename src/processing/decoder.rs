use anyhow::{anyhow, Result};
use image::{DynamicImage, GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold_mut, ThresholdType};
use imageproc::integral_image::{integral_image, sum_image_pixels};
use rxing::Reader;
use serde::Serialize;
use shared::config::DecoderConfig;
use std::sync::Arc;
use tracing::{debug, trace};

use super::qr_detection::{guarded, DetectionRegion};
use crate::observability::metrics;

/// Offset subtracted from the local mean in adaptive thresholding.
const ADAPTIVE_OFFSET: f32 = 2.0;

/// QR payload extraction capability: a (roughly) cropped code in, text out.
pub trait QrDecode: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, image: &GrayImage) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RqrrDecoder;

impl QrDecode for RqrrDecoder {
    fn name(&self) -> &'static str {
        "rqrr"
    }

    fn decode(&self, image: &GrayImage) -> Result<String> {
        let mut prepared_img = rqrr::PreparedImage::prepare(image.clone());
        let grids = prepared_img.detect_grids();

        if grids.is_empty() {
            return Err(anyhow!("rqrr: No grids found"));
        }

        let (_meta, content) = grids[0].decode()?;
        Ok(content)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuircsDecoder;

impl QrDecode for QuircsDecoder {
    fn name(&self) -> &'static str {
        "quircs"
    }

    fn decode(&self, image: &GrayImage) -> Result<String> {
        let mut decoder = quircs::Quirc::default();
        let codes = decoder.identify(image.width() as usize, image.height() as usize, image);

        for code in codes {
            let code = code?;
            let decoded = code.decode()?;
            return Ok(String::from_utf8(decoded.payload)?);
        }
        Err(anyhow!("quircs: No QR code found"))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RxingDecoder;

impl QrDecode for RxingDecoder {
    fn name(&self) -> &'static str {
        "rxing"
    }

    fn decode(&self, image: &GrayImage) -> Result<String> {
        let dynamic_image = DynamicImage::ImageLuma8(image.clone());
        let mut multi_detector = rxing::MultiUseMultiFormatReader::default();

        let result = multi_detector.decode_with_hints(
            &mut rxing::BinaryBitmap::new(rxing::common::GlobalHistogramBinarizer::new(
                rxing::BufferedImageLuminanceSource::new(dynamic_image),
            )),
            &rxing::DecodingHintDictionary::new(),
        )?;

        Ok(result.getText().to_string())
    }
}

/// Tries each backend in turn, fastest first.
pub struct CascadeDecoder {
    backends: Vec<Arc<dyn QrDecode>>,
}

impl CascadeDecoder {
    pub fn new(backends: Vec<Arc<dyn QrDecode>>) -> Self {
        Self { backends }
    }
}

impl Default for CascadeDecoder {
    /// rqrr → quircs → rxing.
    fn default() -> Self {
        Self::new(vec![
            Arc::new(RqrrDecoder),
            Arc::new(QuircsDecoder),
            Arc::new(RxingDecoder),
        ])
    }
}

impl QrDecode for CascadeDecoder {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn decode(&self, image: &GrayImage) -> Result<String> {
        for backend in &self.backends {
            match guarded(backend.name(), || backend.decode(image)) {
                Ok(text) if !text.is_empty() => return Ok(text),
                Ok(_) => trace!("{} returned an empty payload", backend.name()),
                Err(e) => trace!("{} failed: {}", backend.name(), e),
            }
        }
        Err(anyhow!("no backend could decode the region"))
    }
}

/// Preprocessing applied to a region before handing it to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Tight crop, untouched.
    Direct,
    AdaptiveMean,
    AdaptiveGaussian,
    /// Global Otsu threshold.
    Otsu,
    /// Bitwise inversion, for light-on-dark codes.
    Inverted,
}

impl Technique {
    /// Attempt order.
    pub const ALL: [Technique; 5] = [
        Technique::Direct,
        Technique::AdaptiveMean,
        Technique::AdaptiveGaussian,
        Technique::Otsu,
        Technique::Inverted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Technique::Direct => "direct",
            Technique::AdaptiveMean => "adaptive_mean",
            Technique::AdaptiveGaussian => "adaptive_gaussian",
            Technique::Otsu => "otsu",
            Technique::Inverted => "inverted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPayload {
    pub text: String,
    pub region: DetectionRegion,
    pub technique: Technique,
}

/// Runs the decode escalation for one detected region.
#[derive(Clone)]
pub struct RegionDecoder {
    backend: Arc<dyn QrDecode>,
    margin: f32,
    block_radius: u32,
}

impl RegionDecoder {
    pub fn new(backend: Arc<dyn QrDecode>, config: &DecoderConfig) -> Self {
        Self {
            backend,
            margin: config.margin.max(0.0),
            block_radius: config.adaptive_block_radius.max(1),
        }
    }

    /// First non-empty payload from the techniques in [`Technique::ALL`] order,
    /// or `None` once all are exhausted.
    pub fn decode(&self, image: &GrayImage, region: &DetectionRegion) -> Option<DecodedPayload> {
        let (width, height) = image.dimensions();

        let tight = region
            .bbox
            .to_crop(width, height)
            .map(|(x, y, w, h)| image::imageops::crop_imm(image, x, y, w, h).to_image());
        let expanded = region
            .bbox
            .expanded(self.margin)
            .to_crop(width, height)
            .map(|(x, y, w, h)| image::imageops::crop_imm(image, x, y, w, h).to_image());

        for technique in Technique::ALL {
            let source = match technique {
                Technique::Direct => tight.as_ref(),
                _ => expanded.as_ref(),
            };
            let Some(source) = source else {
                continue;
            };

            let prepared = self.prepare(source, technique);
            match guarded(self.backend.name(), || self.backend.decode(&prepared)) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!("🔓 Region decoded via {}", technique.as_str());
                    metrics::record_decode(technique.as_str());
                    return Some(DecodedPayload {
                        text,
                        region: region.clone(),
                        technique,
                    });
                }
                Ok(_) => trace!("{}: empty payload", technique.as_str()),
                Err(e) => trace!("{}: {}", technique.as_str(), e),
            }
        }

        metrics::record_decode("failed");
        None
    }

    fn prepare(&self, crop: &GrayImage, technique: Technique) -> GrayImage {
        match technique {
            Technique::Direct => crop.clone(),
            Technique::AdaptiveMean => adaptive_mean_threshold(crop, self.block_radius),
            Technique::AdaptiveGaussian => adaptive_gaussian_threshold(crop, self.block_radius),
            Technique::Otsu => {
                let mut binary = crop.clone();
                let level = otsu_level(&binary);
                threshold_mut(&mut binary, level, ThresholdType::Binary);
                binary
            }
            Technique::Inverted => {
                let mut inverted = crop.clone();
                image::imageops::invert(&mut inverted);
                inverted
            }
        }
    }
}

/// Pixel becomes white when brighter than its `(2r+1)²` neighbourhood mean
/// minus a small offset. Window is clipped at the borders.
pub fn adaptive_mean_threshold(image: &GrayImage, block_radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let integral = integral_image::<_, u32>(image);
    GrayImage::from_fn(width, height, |x, y| {
        let x0 = x.saturating_sub(block_radius);
        let y0 = y.saturating_sub(block_radius);
        let x1 = (x + block_radius).min(width - 1);
        let y1 = (y + block_radius).min(height - 1);

        let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
        let mean = sum_image_pixels(&integral, x0, y0, x1, y1)[0] as f32 / count;

        let value = image.get_pixel(x, y)[0] as f32;
        if value > mean - ADAPTIVE_OFFSET {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// Same rule as [`adaptive_mean_threshold`] with a Gaussian-weighted
/// neighbourhood.
pub fn adaptive_gaussian_threshold(image: &GrayImage, block_radius: u32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    // Sigma OpenCV derives for a (2r+1) kernel.
    let block = (2 * block_radius + 1) as f32;
    let sigma = 0.3 * ((block - 1.0) * 0.5 - 1.0) + 0.8;
    let blurred = imageproc::filter::gaussian_blur_f32(image, sigma.max(0.5));

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y)[0] as f32;
        let local = blurred.get_pixel(x, y)[0] as f32;
        if value > local - ADAPTIVE_OFFSET {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}
