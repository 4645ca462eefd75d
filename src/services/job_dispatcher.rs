use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use shared::config::JobConfig;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{Severity, SharedStatus};
use crate::observability::metrics;

pub const DOWNLOADING_TEXT: &str = "Downloading receipt data...";
pub const SAVED_TEXT: &str = "RECEIPT SAVED!";
pub const FAILED_TEXT: &str = "Extraction job failed";

/// Characters of stderr kept in logs for a failed job.
const STDERR_EXCERPT: usize = 200;

/// What an extraction job left behind. Output is kept for diagnostics only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the extraction job for one receipt URL.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, url: &str) -> Result<JobReport>;
}

/// Spawns an external program, by default `scrapy crawl nfcedata -a url=<url>`
/// inside the scraper project.
#[derive(Debug, Clone)]
pub struct ExternalCommandRunner {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
}

impl ExternalCommandRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            workdir: workdir.into(),
        }
    }

    pub fn from_config(config: &JobConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone(), config.workdir.clone())
    }

    /// Argument list with every `{url}` placeholder substituted. The URL is
    /// passed as a single argv entry, never through a shell.
    pub fn command_args(&self, url: &str) -> Vec<String> {
        self.args.iter().map(|arg| arg.replace("{url}", url)).collect()
    }
}

#[async_trait]
impl JobRunner for ExternalCommandRunner {
    async fn run(&self, url: &str) -> Result<JobReport> {
        let output = tokio::process::Command::new(&self.program)
            .args(self.command_args(url))
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| {
                format!("failed to launch '{}' in {}", self.program, self.workdir.display())
            })?;

        Ok(JobReport {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Success,
    Failed,
    TimedOut,
}

impl DispatchOutcome {
    pub fn severity(&self) -> Severity {
        match self {
            DispatchOutcome::Success => Severity::Success,
            DispatchOutcome::Failed => Severity::Failed,
            DispatchOutcome::TimedOut => Severity::TimedOut,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Success => "success",
            DispatchOutcome::Failed => "failed",
            DispatchOutcome::TimedOut => "timed_out",
        }
    }
}

/// Launches at most one extraction job at a time.
///
/// `dispatch` returns immediately; the job runs on the tokio runtime behind a
/// hard timeout. Its outcome stays on display for the settle delay, then the
/// status returns to idle and the next dispatch may start.
#[derive(Clone)]
pub struct JobDispatcher {
    runner: Arc<dyn JobRunner>,
    status: SharedStatus,
    busy: Arc<AtomicBool>,
    timeout: Duration,
    settle_delay: Duration,
    runtime: Handle,
}

impl JobDispatcher {
    pub fn new(runner: Arc<dyn JobRunner>, status: SharedStatus, config: &JobConfig, runtime: Handle) -> Self {
        Self::with_timings(
            runner,
            status,
            Duration::from_secs(config.timeout_secs),
            Duration::from_millis(config.settle_delay_ms),
            runtime,
        )
    }

    pub fn with_timings(
        runner: Arc<dyn JobRunner>,
        status: SharedStatus,
        timeout: Duration,
        settle_delay: Duration,
        runtime: Handle,
    ) -> Self {
        Self {
            runner,
            status,
            busy: Arc::new(AtomicBool::new(false)),
            timeout,
            settle_delay,
            runtime,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Takes the single-flight slot without starting a job, so nothing can be
    /// dispatched until the returned reservation is dropped. `None` while a
    /// job (or another reservation) holds the slot.
    pub fn try_reserve(&self) -> Option<SlotReservation> {
        if !self.acquire_slot() {
            return None;
        }
        debug!("🔒 Single-flight slot reserved");
        Some(SlotReservation {
            busy: self.busy.clone(),
        })
    }

    fn acquire_slot(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Starts a job for `url` unless one is already in flight, in which case
    /// this is a no-op returning `None`.
    #[instrument(skip(self))]
    pub fn dispatch(&self, url: &str) -> Option<Uuid> {
        if !self.acquire_slot() {
            debug!("⏳ Job already in flight, skipping dispatch");
            metrics::record_dispatch("skipped");
            return None;
        }

        // From here on the guard owns the busy flag.
        let guard = InFlightGuard {
            busy: self.busy.clone(),
            status: self.status.clone(),
        };
        self.status.begin_processing(DOWNLOADING_TEXT);

        let job_id = Uuid::new_v4();
        info!("🚀 Dispatching extraction job {} for {}", job_id, url);

        let runner = self.runner.clone();
        let status = self.status.clone();
        let url = url.to_string();
        let timeout = self.timeout;
        let settle_delay = self.settle_delay;

        self.runtime.spawn(async move {
            let _guard = guard;

            let outcome = run_job(runner.as_ref(), &url, timeout, job_id).await;
            metrics::record_dispatch(outcome.as_str());

            let text = match outcome {
                DispatchOutcome::Success => SAVED_TEXT.to_string(),
                DispatchOutcome::Failed => FAILED_TEXT.to_string(),
                DispatchOutcome::TimedOut => format!("Timeout ({}s)", timeout.as_secs_f64()),
            };
            status.finish(outcome.severity(), &text);

            tokio::time::sleep(settle_delay).await;
        });

        Some(job_id)
    }
}

async fn run_job(runner: &dyn JobRunner, url: &str, timeout: Duration, job_id: Uuid) -> DispatchOutcome {
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, runner.run(url)).await;
    metrics::record_job_duration(started.elapsed().as_secs_f64());

    match result {
        Ok(Ok(report)) if report.succeeded() => {
            info!("✅ Job {} finished in {:?}", job_id, started.elapsed());
            DispatchOutcome::Success
        }
        Ok(Ok(report)) => {
            let excerpt: String = report.stderr.chars().take(STDERR_EXCERPT).collect();
            warn!(
                "❌ Job {} exited with {:?}: {}",
                job_id,
                report.exit_code,
                excerpt.trim()
            );
            DispatchOutcome::Failed
        }
        Ok(Err(e)) => {
            error!("❌ Job {} could not run: {:#}", job_id, e);
            DispatchOutcome::Failed
        }
        Err(_) => {
            // The child is left running; only our wait is abandoned.
            warn!("⏰ Job {} timed out after {:?}", job_id, timeout);
            DispatchOutcome::TimedOut
        }
    }
}

/// Returns the status to idle and frees the single-flight slot, in that
/// order, however the job task ends (including a panic in the runner).
struct InFlightGuard {
    busy: Arc<AtomicBool>,
    status: SharedStatus,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.status.reset_idle();
        self.busy.store(false, Ordering::Release);
    }
}

/// Exclusive hold on the single-flight slot, released on drop.
#[must_use = "the slot is released as soon as the reservation is dropped"]
pub struct SlotReservation {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
        debug!("🔓 Single-flight slot released");
    }
}
