//! End-to-end scan flow: synthetic camera frames through the real detector
//! and decoder cascade into a fake extraction job.

mod common;

use common::{blank_frame, qr_frame, severities_until_idle, test_config, wait_until_idle, FakeRunner, Script, RECEIPT_URL};
use nfce_reader::models::Severity;
use nfce_reader::processing::ImageSequenceSource;
use nfce_reader::state::AppState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

#[tokio::test]
async fn test_receipt_frame_dispatches_once_and_settles() {
    println!("🧪 Testing QR frame → dispatch → SUCCESS → IDLE");

    let runner = Arc::new(FakeRunner::new(Script::Exit(0)));
    let state = AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap();
    let mut events = state.status.subscribe();
    let mut pipeline = state.build_pipeline();

    let report = pipeline.process_frame_at(&qr_frame(RECEIPT_URL), Duration::from_secs(10));
    assert!(report.regions >= 1, "real detector should find the code");
    assert_eq!(report.decoded, vec![RECEIPT_URL.to_string()]);
    assert_eq!(report.accepted, vec![RECEIPT_URL.to_string()]);
    assert!(report.dispatched.is_some());

    let seen = severities_until_idle(&mut events).await;
    assert_eq!(seen, vec![Severity::Busy, Severity::Success, Severity::Idle]);
    assert_eq!(runner.calls(), 1);
    assert_eq!(runner.urls.lock().as_slice(), &[RECEIPT_URL.to_string()]);

    let snapshot = state.status.snapshot();
    assert_eq!(snapshot.last_url, RECEIPT_URL);
    assert!(!snapshot.is_processing);

    println!("✅ One dispatch, states BUSY → SUCCESS → IDLE");
}

#[tokio::test]
async fn test_same_receipt_is_debounced_after_job() {
    let runner = Arc::new(FakeRunner::new(Script::Exit(0)));
    let state = AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap();
    let mut pipeline = state.build_pipeline();
    let frame = qr_frame(RECEIPT_URL);

    assert!(pipeline.process_frame_at(&frame, Duration::from_secs(10)).dispatched.is_some());
    wait_until_idle(&state.status).await;

    // Inside the 4s cooldown the same code is decoded but not re-accepted.
    let again = pipeline.process_frame_at(&frame, Duration::from_secs(12));
    assert_eq!(again.decoded, vec![RECEIPT_URL.to_string()]);
    assert!(again.accepted.is_empty());
    assert!(again.dispatched.is_none());

    let later = pipeline.process_frame_at(&frame, Duration::from_secs(16));
    assert!(later.dispatched.is_some());
    wait_until_idle(&state.status).await;

    assert_eq!(runner.calls(), 2);
    println!("✅ Cooldown honoured across frames");
}

#[tokio::test]
async fn test_frames_during_job_are_skipped() {
    let runner = Arc::new(FakeRunner::new(Script::WaitForRelease));
    let state = AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap();
    let mut pipeline = state.build_pipeline();
    let frame = qr_frame(RECEIPT_URL);

    assert!(pipeline.process_frame_at(&frame, Duration::from_secs(10)).dispatched.is_some());
    // Let the spawned job reach the runner.
    tokio::task::yield_now().await;

    for second in 20..25 {
        let report = pipeline.process_frame_at(&frame, Duration::from_secs(second));
        assert!(report.skipped_busy);
        assert!(report.dispatched.is_none());
    }
    assert!(state.dispatcher.is_busy());

    runner.release.notify_one();
    wait_until_idle(&state.status).await;
    assert_eq!(runner.calls(), 1);
    assert!(!state.dispatcher.is_busy());
}

#[tokio::test]
async fn test_hanging_job_times_out_and_releases_slot() {
    println!("🧪 Testing job timeout");

    let runner = Arc::new(FakeRunner::new(Script::Hang));
    let state = AppState::with_runner(test_config(1), runner.clone(), Handle::current()).unwrap();
    let mut events = state.status.subscribe();
    let mut pipeline = state.build_pipeline();

    assert!(pipeline
        .process_frame_at(&qr_frame(RECEIPT_URL), Duration::from_secs(10))
        .dispatched
        .is_some());

    let seen = severities_until_idle(&mut events).await;
    assert_eq!(seen, vec![Severity::Busy, Severity::TimedOut, Severity::Idle]);
    assert_eq!(runner.calls(), 1);
    assert!(!state.dispatcher.is_busy());

    println!("✅ BUSY → TIMED_OUT → IDLE, slot released");
}

#[tokio::test]
async fn test_non_receipt_code_shows_invalid_hint() {
    let runner = Arc::new(FakeRunner::new(Script::Exit(0)));
    let state = AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap();
    let mut pipeline = state.build_pipeline().with_hint_hold(Duration::from_millis(500));

    let report = pipeline.process_frame_at(&qr_frame("https://example.com/cat.jpg"), Duration::from_secs(1));
    assert_eq!(report.rejected, 1);
    assert!(report.dispatched.is_none());
    assert_eq!(state.status.severity(), Severity::Invalid);

    // Hint holds briefly once the code leaves the frame, then clears.
    pipeline.process_frame_at(&blank_frame(), Duration::from_millis(1200));
    assert_eq!(state.status.severity(), Severity::Invalid);
    pipeline.process_frame_at(&blank_frame(), Duration::from_millis(1600));
    assert_eq!(state.status.severity(), Severity::Idle);

    assert_eq!(runner.calls(), 0);
}

#[tokio::test]
async fn test_run_loop_over_frame_directory() {
    let dir = std::env::temp_dir().join(format!("nfce-frames-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    blank_frame().save(dir.join("000.png")).unwrap();
    qr_frame(RECEIPT_URL).save(dir.join("001.png")).unwrap();
    blank_frame().save(dir.join("002.png")).unwrap();

    let runner = Arc::new(FakeRunner::new(Script::Exit(0)));
    let state = AppState::with_runner(test_config(5), runner.clone(), Handle::current()).unwrap();
    let mut pipeline = state.build_pipeline();

    let frames = tokio::task::spawn_blocking(move || {
        let mut source = ImageSequenceSource::from_dir(&dir, false)?;
        let shutdown = AtomicBool::new(false);
        let frames = pipeline.run(&mut source, &shutdown, Duration::ZERO);
        std::fs::remove_dir_all(&dir).ok();
        frames
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(frames, 3);
    wait_until_idle(&state.status).await;
    assert_eq!(runner.calls(), 1);
}
