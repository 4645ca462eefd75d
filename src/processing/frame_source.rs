use anyhow::{anyhow, Context, Result};
use image::DynamicImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// Producer of raster frames. `Ok(None)` means end of stream; an `Err` is
/// fatal to the frame loop.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Frees the underlying device. Called once when the loop stops.
    fn release(&mut self) {}
}

/// Replays image files in lexicographic order, optionally looping forever.
#[derive(Debug)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    looping: bool,
    released: bool,
}

impl ImageSequenceSource {
    pub fn from_paths(mut paths: Vec<PathBuf>, looping: bool) -> Self {
        paths.sort();
        Self {
            paths,
            cursor: 0,
            looping,
            released: false,
        }
    }

    /// Every `png`/`jpg`/`jpeg`/`bmp` file directly inside `dir`.
    pub fn from_dir(dir: &Path, looping: bool) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("cannot open frame directory {}", dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if path.is_file() && is_frame {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(anyhow!("no image frames found in {}", dir.display()));
        }

        info!("🎞️ Frame source: {} image(s) from {}", paths.len(), dir.display());
        Ok(Self::from_paths(paths, looping))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        if self.released || self.paths.is_empty() {
            return Ok(None);
        }
        if self.cursor >= self.paths.len() {
            if !self.looping {
                return Ok(None);
            }
            self.cursor = 0;
        }

        let path = &self.paths[self.cursor];
        self.cursor += 1;
        let frame = image::open(path).with_context(|| format!("cannot read frame {}", path.display()))?;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if !self.released {
            debug!("Frame source released after {} frame(s)", self.cursor);
            self.released = true;
        }
    }
}

/// Frames held in memory, served once each.
#[derive(Debug, Default)]
pub struct InMemorySource {
    frames: VecDeque<DynamicImage>,
    released: bool,
}

impl InMemorySource {
    pub fn new(frames: impl IntoIterator<Item = DynamicImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            released: false,
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for InMemorySource {
    fn read_frame(&mut self) -> Result<Option<DynamicImage>> {
        if self.released {
            return Ok(None);
        }
        Ok(self.frames.pop_front())
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}
