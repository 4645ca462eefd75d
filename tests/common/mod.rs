#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use nfce_reader::models::{Severity, SharedStatus, StatusEvent};
use nfce_reader::services::{JobReport, JobRunner};
use qrcode::QrCode;
use shared::Config;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

pub const RECEIPT_URL: &str = "https://www.sefaz.example/nfce/qrcode?p=123";

/// `payload` rendered with 8px modules and a quiet zone, centred on a white
/// canvas.
pub fn qr_frame(payload: &str) -> DynamicImage {
    let code = QrCode::new(payload.as_bytes()).expect("payload fits in a QR code");
    let qr = code
        .render::<Luma<u8>>()
        .module_dimensions(8, 8)
        .quiet_zone(true)
        .build();

    let (qw, qh) = qr.dimensions();
    let mut canvas = GrayImage::from_pixel(qw + 160, qh + 80, Luma([255u8]));
    image::imageops::replace(&mut canvas, &qr, 80, 40);
    DynamicImage::ImageLuma8(canvas)
}

pub fn blank_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(320, 240, Luma([255u8])))
}

pub fn temp_csv() -> PathBuf {
    std::env::temp_dir().join(format!("nfce-it-{}.csv", uuid::Uuid::new_v4()))
}

/// Defaults with short job timings and a throwaway store.
pub fn test_config(timeout_secs: u64) -> Config {
    let mut config = Config::default();
    config.job.timeout_secs = timeout_secs;
    config.job.settle_delay_ms = 30;
    config.store.csv_file = temp_csv();
    config
}

/// Behaviour of a fake extraction job.
pub enum Script {
    Exit(i32),
    Hang,
    WaitForRelease,
}

pub struct FakeRunner {
    pub calls: AtomicUsize,
    pub urls: parking_lot::Mutex<Vec<String>>,
    pub release: Notify,
    script: Script,
}

impl FakeRunner {
    pub fn new(script: Script) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            urls: parking_lot::Mutex::new(Vec::new()),
            release: Notify::new(),
            script,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, url: &str) -> Result<JobReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());

        let exit_code = match self.script {
            Script::Exit(code) => code,
            Script::Hang => {
                std::future::pending::<()>().await;
                0
            }
            Script::WaitForRelease => {
                self.release.notified().await;
                0
            }
        };

        Ok(JobReport {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Severities published until the status returns to idle.
pub async fn severities_until_idle(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<Severity> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("status transition within 10s")
            .expect("status channel open");
        seen.push(event.severity);
        if event.severity == Severity::Idle {
            return seen;
        }
    }
}

pub async fn wait_until_idle(status: &SharedStatus) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while status.is_processing() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job settles within 10s");
}
