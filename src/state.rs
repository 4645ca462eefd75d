use anyhow::{Context, Result};
use shared::Config;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

use crate::models::SharedStatus;
use crate::processing::ScanPipeline;
use crate::services::{DebounceGate, ExternalCommandRunner, JobDispatcher, JobRunner, ReceiptStore};

/// Shared application state.
///
/// The frame loop and the HTTP handlers share one status record, one debounce
/// gate and one dispatcher, so a URL accepted by either path blocks the other
/// for the same cooldown and single-flight slot.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub status: SharedStatus,
    pub gate: DebounceGate,
    pub dispatcher: JobDispatcher,
    pub store: ReceiptStore,
    pub started_at: Instant,
}

impl AppState {
    /// Must be called from inside a tokio runtime; jobs are spawned on it.
    pub fn new(config: Config) -> Result<Self> {
        let runner = Arc::new(ExternalCommandRunner::from_config(&config.job));
        Self::with_runner(config, runner, Handle::current())
    }

    pub fn with_runner(config: Config, runner: Arc<dyn JobRunner>, runtime: Handle) -> Result<Self> {
        let cooldown = Duration::try_from_secs_f64(config.debounce.cooldown_secs)
            .context("invalid debounce cooldown")?;

        let status = SharedStatus::new();
        let gate = DebounceGate::new(status.clone(), cooldown);
        let dispatcher = JobDispatcher::new(runner, status.clone(), &config.job, runtime);
        let store = ReceiptStore::new(config.store.csv_file.clone());

        info!(
            "🧾 Reader state ready: job '{}' in {}, store {}",
            config.job.program,
            config.job.workdir.display(),
            config.store.csv_file.display()
        );

        Ok(Self {
            config,
            status,
            gate,
            dispatcher,
            store,
            started_at: Instant::now(),
        })
    }

    /// Scan pipeline wired to this state's gate, dispatcher and status.
    pub fn build_pipeline(&self) -> ScanPipeline {
        ScanPipeline::from_config(
            &self.config,
            self.gate.clone(),
            self.dispatcher.clone(),
            self.status.clone(),
        )
    }
}
