// ============================================================================
// PROMETHEUS METRICS
// ============================================================================
// Counters and histograms for the scan loop, the job dispatcher and the
// HTTP control surface. Scraped from /metrics.
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nfce_http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "nfce_http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]
    )
    .unwrap();

    // ========================================================================
    // SCAN LOOP METRICS
    // ========================================================================

    pub static ref FRAMES_PROCESSED_TOTAL: IntCounter = register_int_counter!(
        "nfce_frames_processed_total",
        "Frames run through the scan pipeline"
    )
    .unwrap();

    /// Seconds spent on one frame, enhancement through debounce.
    pub static ref FRAME_DURATION_SECONDS: Histogram = register_histogram!(
        "nfce_frame_duration_seconds",
        "Per-frame processing time in seconds",
        vec![0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5]
    )
    .unwrap();

    pub static ref REGIONS_DETECTED_TOTAL: IntCounter = register_int_counter!(
        "nfce_regions_detected_total",
        "Candidate QR regions reported by the detector, before deduplication"
    )
    .unwrap();

    pub static ref DETECTION_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "nfce_detection_failures_total",
        "Detector passes that failed at one scale"
    )
    .unwrap();

    /// Decode attempts per region by outcome: the technique that succeeded, or `failed`.
    pub static ref DECODE_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nfce_decode_outcomes_total",
        "Region decode outcomes",
        &["outcome"]
    )
    .unwrap();

    pub static ref URL_REJECTIONS_TOTAL: IntCounter = register_int_counter!(
        "nfce_url_rejections_total",
        "Decoded payloads rejected as not being fiscal receipt URLs"
    )
    .unwrap();

    pub static ref DEBOUNCE_DECISIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nfce_debounce_decisions_total",
        "Debounce gate decisions",
        &["decision"]
    )
    .unwrap();

    // ========================================================================
    // JOB DISPATCH METRICS
    // ========================================================================

    /// `success`, `failed`, `timed_out`, or `skipped` when a job was already in flight.
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "nfce_dispatch_outcomes_total",
        "Extraction job outcomes",
        &["outcome"]
    )
    .unwrap();

    /// 1 while the single-flight slot is taken, refreshed on every scrape.
    pub static ref READER_BUSY: IntGauge = register_int_gauge!(
        "nfce_reader_busy",
        "Whether an extraction job (or a store rewrite) holds the reader"
    )
    .unwrap();

    pub static ref JOB_DURATION_SECONDS: Histogram = register_histogram!(
        "nfce_job_duration_seconds",
        "Extraction job wall time in seconds",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0]
    )
    .unwrap();
}

/// Counts one HTTP request and observes its latency, labelled by route.
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

pub fn record_frame(duration_secs: f64) {
    FRAMES_PROCESSED_TOTAL.inc();
    FRAME_DURATION_SECONDS.observe(duration_secs);
}

pub fn record_decode(outcome: &str) {
    DECODE_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_debounce(accepted: bool) {
    let decision = if accepted { "accepted" } else { "suppressed" };
    DEBOUNCE_DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn record_dispatch(outcome: &str) {
    DISPATCH_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_job_duration(duration_secs: f64) {
    JOB_DURATION_SECONDS.observe(duration_secs);
}
