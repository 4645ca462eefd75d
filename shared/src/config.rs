//! Configuration management for the reader

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub enhance: EnhanceConfig,
    pub detector: DetectorConfig,
    pub decoder: DecoderConfig,
    pub debounce: DebounceConfig,
    pub job: JobConfig,
    pub store: StoreConfig,
    pub app: AppConfig,
}

/// Frame source settings. Without a frame directory the reader runs only the
/// HTTP control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub frame_dir: Option<PathBuf>,
    pub loop_frames: bool,
    pub frame_interval_ms: u64,
}

/// Image-quality transform applied before detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhanceConfig {
    /// 0.0 disables sharpening, 1.0 is the classic 3x3 sharpen kernel.
    pub sharpen_strength: f32,
    /// 0.0 disables local contrast equalization.
    pub clahe_clip_limit: f32,
    /// Number of tiles per axis.
    pub clahe_tiles: u32,
    /// Median filter radius, 0 disables denoising.
    pub denoise_radius: u32,
    /// Uniform upscale factor, must be >= 1.0.
    pub upscale: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub scales: Vec<f32>,
    /// Centered crop ("zoom box") as a fraction of the frame, full frame when unset.
    pub zoom_window: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Fraction of the box size added on every side before binarization.
    pub margin: f32,
    pub adaptive_block_radius: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    pub cooldown_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub program: String,
    /// Argument template, `{url}` is replaced by the accepted URL.
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub timeout_secs: u64,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub csv_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub http_enabled: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_dir: None,
            loop_frames: false,
            frame_interval_ms: 33,
        }
    }
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            sharpen_strength: 1.0,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            denoise_radius: 0,
            upscale: 1.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scales: vec![1.0],
            zoom_window: None,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            margin: 0.30,
            adaptive_block_radius: 15,
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self { cooldown_secs: 4.0 }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program: "scrapy".to_string(),
            args: default_job_args(),
            workdir: PathBuf::from("nfceReader/"),
            timeout_secs: 45,
            settle_delay_ms: 2000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            csv_file: PathBuf::from("nfc_data.csv"),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            http_enabled: true,
        }
    }
}

const MAX_UPSCALE: f32 = 4.0;
const MAX_SCALE: f32 = 4.0;
const MAX_DECODE_MARGIN: f32 = 2.0;

fn default_job_args() -> Vec<String> {
    ["crawl", "nfcedata", "-a", "url={url}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(name, default)
        .trim()
        .parse::<T>()
        .with_context(|| format!("invalid value for {}", name))
}

/// Parses a comma separated list of scale factors, e.g. `1.0,0.5,1.5`.
pub fn parse_scales(raw: &str) -> anyhow::Result<Vec<f32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .with_context(|| format!("invalid scale '{}'", s))
        })
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let zoom_window = match env::var("NFCE_ZOOM_WINDOW") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<f32>()
                    .context("invalid value for NFCE_ZOOM_WINDOW")?,
            ),
            _ => None,
        };

        let job_args = match env::var("NFCE_JOB_ARGS") {
            Ok(raw) if !raw.trim().is_empty() => {
                raw.split_whitespace().map(str::to_string).collect()
            }
            _ => default_job_args(),
        };

        let config = Config {
            camera: CameraConfig {
                frame_dir: env::var("NFCE_FRAME_DIR").ok().map(PathBuf::from),
                loop_frames: parse_var("NFCE_FRAME_LOOP", "false")?,
                frame_interval_ms: parse_var("NFCE_FRAME_INTERVAL_MS", "33")?,
            },
            enhance: EnhanceConfig {
                sharpen_strength: parse_var("NFCE_SHARPEN_STRENGTH", "1.0")?,
                clahe_clip_limit: parse_var("NFCE_CLAHE_CLIP_LIMIT", "2.0")?,
                clahe_tiles: parse_var("NFCE_CLAHE_TILES", "8")?,
                denoise_radius: parse_var("NFCE_DENOISE_RADIUS", "0")?,
                upscale: parse_var("NFCE_UPSCALE", "1.0")?,
            },
            detector: DetectorConfig {
                scales: parse_scales(&var_or("NFCE_SCALES", "1.0"))?,
                zoom_window,
            },
            decoder: DecoderConfig {
                margin: parse_var("NFCE_DECODE_MARGIN", "0.30")?,
                adaptive_block_radius: parse_var("NFCE_ADAPTIVE_BLOCK_RADIUS", "15")?,
            },
            debounce: DebounceConfig {
                cooldown_secs: parse_var("NFCE_COOLDOWN_SECS", "4")?,
            },
            job: JobConfig {
                program: var_or("NFCE_JOB_PROGRAM", "scrapy"),
                args: job_args,
                workdir: PathBuf::from(var_or("NFCE_JOB_WORKDIR", "nfceReader/")),
                timeout_secs: parse_var("NFCE_JOB_TIMEOUT_SECS", "45")?,
                settle_delay_ms: parse_var("NFCE_SETTLE_DELAY_MS", "2000")?,
            },
            store: StoreConfig {
                csv_file: PathBuf::from(var_or("NFCE_CSV_FILE", "nfc_data.csv")),
            },
            app: AppConfig {
                port: parse_var("PORT", "5000")?,
                http_enabled: parse_var("NFCE_HTTP_ENABLED", "true")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let enhance = &self.enhance;
        if !enhance.sharpen_strength.is_finite() || enhance.sharpen_strength < 0.0 {
            return Err(anyhow!("sharpen strength must be a finite value >= 0"));
        }
        if !enhance.clahe_clip_limit.is_finite() || enhance.clahe_clip_limit < 0.0 {
            return Err(anyhow!("CLAHE clip limit must be a finite value >= 0"));
        }
        if !(1.0..=MAX_UPSCALE).contains(&enhance.upscale) {
            return Err(anyhow!("upscale factor must be in [1, {}]", MAX_UPSCALE));
        }
        if self
            .detector
            .scales
            .iter()
            .any(|s| !(*s > 0.0 && *s <= MAX_SCALE))
        {
            return Err(anyhow!("detector scales must be in (0, {}]", MAX_SCALE));
        }
        if let Some(window) = self.detector.zoom_window {
            if !(window > 0.0 && window <= 1.0) {
                return Err(anyhow!("zoom window must be in (0, 1]"));
            }
        }
        if !(0.0..=MAX_DECODE_MARGIN).contains(&self.decoder.margin) {
            return Err(anyhow!("decode margin must be in [0, {}]", MAX_DECODE_MARGIN));
        }
        let cooldown = self.debounce.cooldown_secs;
        if !cooldown.is_finite() || cooldown < 0.0 {
            return Err(anyhow!("cooldown must be a finite value >= 0"));
        }
        if self.job.program.trim().is_empty() {
            return Err(anyhow!("job program must not be empty"));
        }
        Ok(())
    }
}
