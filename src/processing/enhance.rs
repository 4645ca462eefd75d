use image::{imageops::FilterType, GrayImage};
use imageproc::filter::filter3x3;
use shared::config::EnhanceConfig;
use tracing::trace;

/// Image-quality transform applied to every frame before detection.
///
/// Works on the luminance channel only; detectors and decoders consume
/// grayscale anyway. Stateless, the same input always yields the same output.
#[derive(Debug, Clone, Default)]
pub struct FrameEnhancer {
    params: EnhanceConfig,
}

impl FrameEnhancer {
    pub fn new(params: EnhanceConfig) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &EnhanceConfig {
        &self.params
    }

    pub fn enhance(&self, image: &GrayImage) -> GrayImage {
        enhance(image, &self.params)
    }
}

/// Upscale → denoise → sharpen → local contrast. Zero-area input is returned
/// unchanged.
pub fn enhance(image: &GrayImage, params: &EnhanceConfig) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut out = if params.upscale > 1.0 {
        let new_w = ((width as f32 * params.upscale).round() as u32).max(1);
        let new_h = ((height as f32 * params.upscale).round() as u32).max(1);
        image::imageops::resize(image, new_w, new_h, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    if params.denoise_radius > 0 {
        out = imageproc::filter::median_filter(&out, params.denoise_radius, params.denoise_radius);
    }

    if params.sharpen_strength > 0.0 {
        out = sharpen(&out, params.sharpen_strength);
    }

    if params.clahe_clip_limit > 0.0 {
        out = apply_clahe(&out, params.clahe_clip_limit, params.clahe_tiles.max(1));
    }

    trace!(
        width = out.width(),
        height = out.height(),
        "Frame enhanced"
    );
    out
}

/// 3x3 sharpening: identity plus `strength` times the 8-neighbour Laplacian.
/// At strength 1.0 this is the `[-1 -1 -1; -1 9 -1; -1 -1 -1]` kernel.
/// Borders replicate the edge pixel.
pub fn sharpen(image: &GrayImage, strength: f32) -> GrayImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let s = -strength;
    let kernel = [s, s, s, s, 1.0 + 8.0 * strength, s, s, s, s];
    filter3x3::<_, f32, u8>(image, &kernel)
}

/// Contrast Limited Adaptive Histogram Equalization.
///
/// The image is split into `tiles x tiles` cells. Each cell gets a clipped
/// histogram (limit = `clip_limit * cell_pixels / 256`, excess spread evenly)
/// and its own lookup table; pixels blend the four nearest tables bilinearly
/// so cell borders don't show.
pub fn apply_clahe(image: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let tiles_x = tiles.min(width).max(1) as usize;
    let tiles_y = tiles.min(height).max(1) as usize;
    let tile_w = (width as usize + tiles_x - 1) / tiles_x;
    let tile_h = (height as usize + tiles_y - 1) / tiles_y;

    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];

    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x_start = tx * tile_w;
            let y_start = ty * tile_h;
            let x_end = ((tx + 1) * tile_w).min(width as usize);
            let y_end = ((ty + 1) * tile_h).min(height as usize);
            if x_start >= x_end || y_start >= y_end {
                // Trailing cells can be empty when tiles do not divide evenly.
                luts[ty * tiles_x + tx] = identity_lut();
                continue;
            }

            let mut histogram = [0u32; 256];
            for y in y_start..y_end {
                for x in x_start..x_end {
                    histogram[image.get_pixel(x as u32, y as u32)[0] as usize] += 1;
                }
            }

            let tile_pixels = ((x_end - x_start) * (y_end - y_start)) as u32;
            let clip_value = (((tile_pixels as f32 * clip_limit) / 256.0) as u32).max(1);
            let mut clipped_sum = 0u32;
            for count in histogram.iter_mut() {
                if *count > clip_value {
                    clipped_sum += *count - clip_value;
                    *count = clip_value;
                }
            }

            let redistribute = clipped_sum / 256;
            let mut remainder = clipped_sum % 256;
            for count in histogram.iter_mut() {
                *count += redistribute;
                if remainder > 0 {
                    *count += 1;
                    remainder -= 1;
                }
            }

            let lut = &mut luts[ty * tiles_x + tx];
            let mut cdf = 0u32;
            for (value, count) in histogram.iter().enumerate() {
                cdf += count;
                lut[value] = ((cdf as f32 / tile_pixels as f32) * 255.0).round().min(255.0) as u8;
            }
        }
    }

    let mut result = GrayImage::new(width, height);
    for y in 0..height {
        // Position relative to tile centers.
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = gy.floor().max(0.0) as usize;
        let ty1 = (ty0 + 1).min(tiles_y - 1);
        let wy = (gy - ty0 as f32).clamp(0.0, 1.0);

        for x in 0..width {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = gx.floor().max(0.0) as usize;
            let tx1 = (tx0 + 1).min(tiles_x - 1);
            let wx = (gx - tx0 as f32).clamp(0.0, 1.0);

            let value = image.get_pixel(x, y)[0] as usize;
            let tl = luts[ty0.min(tiles_y - 1) * tiles_x + tx0.min(tiles_x - 1)][value] as f32;
            let tr = luts[ty0.min(tiles_y - 1) * tiles_x + tx1][value] as f32;
            let bl = luts[ty1 * tiles_x + tx0.min(tiles_x - 1)][value] as f32;
            let br = luts[ty1 * tiles_x + tx1][value] as f32;

            let top = tl + (tr - tl) * wx;
            let bottom = bl + (br - bl) * wx;
            result.get_pixel_mut(x, y)[0] = (top + (bottom - top) * wy).round() as u8;
        }
    }

    result
}

fn identity_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = i as u8;
    }
    lut
}
