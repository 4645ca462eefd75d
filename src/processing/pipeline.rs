use anyhow::Result;
use image::DynamicImage;
use serde::Serialize;
use shared::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::decoder::{CascadeDecoder, RegionDecoder};
use super::dedup::dedupe;
use super::enhance::FrameEnhancer;
use super::frame_source::FrameSource;
use super::qr_detection::{RegionDetector, RqrrLocator};
use super::url_validator;
use crate::models::{Severity, SharedStatus, StatusEvent, READY_TEXT};
use crate::observability::metrics;
use crate::services::{DebounceGate, JobDispatcher};

pub const SCANNING_TEXT: &str = "Reading QR code...";
pub const INVALID_TEXT: &str = "Invalid QR code";

/// How long a SCANNING/INVALID hint survives once codes leave the frame.
const DEFAULT_HINT_HOLD: Duration = Duration::from_millis(1500);

/// What happened to one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    /// Frame skipped because a job was in flight.
    pub skipped_busy: bool,
    /// Regions left after deduplication.
    pub regions: usize,
    pub decoded: Vec<String>,
    pub rejected: usize,
    /// URLs that passed the debounce gate.
    pub accepted: Vec<String>,
    pub dispatched: Option<Uuid>,
}

/// Per-frame chain: enhance → detect → dedupe → decode → validate → debounce
/// → dispatch. Runs synchronously on the caller's thread and never waits on
/// the extraction job.
pub struct ScanPipeline {
    enhancer: FrameEnhancer,
    detector: RegionDetector,
    decoder: RegionDecoder,
    gate: DebounceGate,
    dispatcher: JobDispatcher,
    status: SharedStatus,
    hint_hold: Duration,
    hint_since: Option<Duration>,
}

impl ScanPipeline {
    pub fn new(
        enhancer: FrameEnhancer,
        detector: RegionDetector,
        decoder: RegionDecoder,
        gate: DebounceGate,
        dispatcher: JobDispatcher,
        status: SharedStatus,
    ) -> Self {
        Self {
            enhancer,
            detector,
            decoder,
            gate,
            dispatcher,
            status,
            hint_hold: DEFAULT_HINT_HOLD,
            hint_since: None,
        }
    }

    /// rqrr localization and the rqrr → quircs → rxing decode cascade.
    pub fn from_config(
        config: &Config,
        gate: DebounceGate,
        dispatcher: JobDispatcher,
        status: SharedStatus,
    ) -> Self {
        Self::new(
            FrameEnhancer::new(config.enhance.clone()),
            RegionDetector::new(Arc::new(RqrrLocator), &config.detector),
            RegionDecoder::new(Arc::new(CascadeDecoder::default()), &config.decoder),
            gate,
            dispatcher,
            status,
        )
    }

    pub fn with_hint_hold(mut self, hold: Duration) -> Self {
        self.hint_hold = hold;
        self
    }

    pub fn process_frame(&mut self, frame: &DynamicImage) -> FrameReport {
        let now = self.gate.elapsed();
        self.process_frame_at(frame, now)
    }

    /// `now` is the gate's monotonic clock, passed in so callers can replay
    /// frames on a synthetic timeline.
    pub fn process_frame_at(&mut self, frame: &DynamicImage, now: Duration) -> FrameReport {
        let started = Instant::now();
        let report = self.run_stages(frame, now);
        metrics::record_frame(started.elapsed().as_secs_f64());
        report
    }

    fn run_stages(&mut self, frame: &DynamicImage, now: Duration) -> FrameReport {
        let mut report = FrameReport::default();

        // Nothing downstream can launch while a job runs.
        if self.dispatcher.is_busy() {
            report.skipped_busy = true;
            return report;
        }

        let enhanced = self.enhancer.enhance(&frame.to_luma8());
        let regions = dedupe(self.detector.detect(&enhanced));
        report.regions = regions.len();

        if regions.is_empty() {
            self.expire_hint(now);
            return report;
        }

        for region in &regions {
            let Some(payload) = self.decoder.decode(&enhanced, region) else {
                continue;
            };
            let url = payload.text.trim().to_string();
            report.decoded.push(url.clone());

            if !url_validator::is_valid(&url) {
                debug!("🚫 Not a receipt URL: {}", url);
                metrics::URL_REJECTIONS_TOTAL.inc();
                report.rejected += 1;
                self.hint(Severity::Invalid, INVALID_TEXT, now);
                continue;
            }

            if !self.gate.offer(&url, now) {
                continue;
            }
            info!("📷 Receipt QR detected: {}", url);
            report.accepted.push(url.clone());

            if let Some(job_id) = self.dispatcher.dispatch(&url) {
                report.dispatched = Some(job_id);
            }
        }

        if report.decoded.is_empty() {
            self.hint(Severity::Scanning, SCANNING_TEXT, now);
        }

        report
    }

    fn hint(&mut self, severity: Severity, text: &str, now: Duration) {
        if self.status.show_hint(severity, text) {
            self.hint_since = Some(now);
        }
    }

    fn expire_hint(&mut self, now: Duration) {
        let Some(since) = self.hint_since else {
            return;
        };
        if now.saturating_sub(since) >= self.hint_hold {
            self.hint_since = None;
            if matches!(self.status.severity(), Severity::Scanning | Severity::Invalid) {
                self.status.show_hint(Severity::Idle, READY_TEXT);
            }
        }
    }

    /// Pulls frames until the source ends or `shutdown` is raised, logging
    /// every status transition as a HUD line. The source is released on every
    /// exit path; a source error ends the loop and is returned.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        shutdown: &AtomicBool,
        frame_interval: Duration,
    ) -> Result<u64> {
        let mut hud = self.status.subscribe();
        let mut frames = 0u64;
        info!("🎥 Scan loop started");

        let result = loop {
            if shutdown.load(Ordering::Acquire) {
                info!("🛑 Scan loop stopping on shutdown");
                break Ok(frames);
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("🏁 Frame source exhausted after {} frame(s)", frames);
                    break Ok(frames);
                }
                Err(e) => {
                    warn!("❌ Frame source failed: {:#}", e);
                    break Err(e.context("frame source failed"));
                }
            };

            let report = self.process_frame(&frame);
            frames += 1;
            if !report.accepted.is_empty() {
                debug!(frame = frames, ?report, "Frame accepted a URL");
            }

            log_hud(&mut hud);

            if !frame_interval.is_zero() {
                std::thread::sleep(frame_interval);
            }
        };

        source.release();
        log_hud(&mut hud);
        result
    }
}

fn log_hud(events: &mut broadcast::Receiver<StatusEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => {
                let busy = if event.is_processing { " [PROCESSING]" } else { "" };
                info!("📟 [{}] {}{}", event.severity, event.status_text, busy);
            }
            Err(TryRecvError::Lagged(missed)) => debug!("HUD skipped {} transition(s)", missed),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
        }
    }
}
