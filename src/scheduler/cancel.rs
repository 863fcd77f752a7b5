//! Nightly termination of lines whose plan has expired.
//!
//! A run pulls the full expired set once, then terminates lines one at a
//! time with a fixed pause between upstream calls. A failing line is
//! recorded and skipped; only a failed scan aborts the run. At most one
//! run is active per process, whether started by cron or by hand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use super::schedule::CronSchedule;
use super::store::{DeviceLookup, ExpiredLine, ExpiredLineScanner};
use crate::config::SchedulerConfig;
use crate::widely::{ActionDispatcher, DeviceAction};

const DEVICE_NOT_FOUND: &str = "device not found";
const NO_ENDPOINT: &str = "device has no endpoint id";
const DEADLINE_EXCEEDED: &str = "run deadline exceeded";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("an auto-cancel run is already in progress")]
    AlreadyRunning,

    #[error("failed to list expired lines: {0}")]
    Scan(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunTrigger {
    Cron,
    Manual,
}

impl RunTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Manual => "manual",
        }
    }
}

/// Outcome for one expired line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationResult {
    pub success: bool,
    pub customer_device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CancellationResult {
    fn succeeded(line: &ExpiredLine, device_number: Option<String>) -> Self {
        Self {
            success: true,
            customer_device_id: line.customer_device_id.clone(),
            device_number,
            error: None,
        }
    }

    fn failed(line: &ExpiredLine, device_number: Option<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            customer_device_id: line.customer_device_id.clone(),
            device_number,
            error: Some(error.into()),
        }
    }
}

/// Aggregate of one run. One result per pulled line, in scan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<CancellationResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunSummary>,
}

/// Clears the in-progress flag when dropped, including on panic.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AutoCancelScheduler {
    scanner: Arc<dyn ExpiredLineScanner>,
    devices: Arc<dyn DeviceLookup>,
    dispatcher: ActionDispatcher,
    schedule: CronSchedule,
    item_delay: Duration,
    run_timeout: Option<Duration>,
    in_progress: AtomicBool,
    last_run: Mutex<Option<RunSummary>>,
}

impl AutoCancelScheduler {
    pub fn new(
        scanner: Arc<dyn ExpiredLineScanner>,
        devices: Arc<dyn DeviceLookup>,
        dispatcher: ActionDispatcher,
        config: &SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let schedule = CronSchedule::parse(&config.cron, &config.timezone)?;
        Ok(Self {
            scanner,
            devices,
            dispatcher,
            schedule,
            item_delay: Duration::from_millis(config.item_delay_ms),
            run_timeout: (config.run_timeout_secs > 0)
                .then(|| Duration::from_secs(config.run_timeout_secs)),
            in_progress: AtomicBool::new(false),
            last_run: Mutex::new(None),
        })
    }

    /// Override the whole-run deadline. `None` waits for the batch to finish.
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            schedule: self.schedule.expression().to_string(),
            timezone: self.schedule.timezone().name().to_string(),
            next_run: self.schedule.next_after(Utc::now()),
            last_run: self.last_run.lock().clone(),
        }
    }

    /// Run one batch now. Rejected with [`SchedulerError::AlreadyRunning`]
    /// while another run holds the guard.
    pub async fn run_once(&self, trigger: RunTrigger) -> Result<RunSummary, SchedulerError> {
        let Some(_guard) = RunGuard::acquire(&self.in_progress) else {
            tracing::warn!(trigger = trigger.as_str(), "Auto-cancel run rejected: already running");
            return Err(SchedulerError::AlreadyRunning);
        };

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let today = self.schedule.local_date(started_at);
        tracing::info!(
            run_id = %run_id,
            trigger = trigger.as_str(),
            %today,
            "Auto-cancel run started"
        );

        let lines = self.scanner.expired_lines(today).await.map_err(|e| {
            tracing::error!(
                run_id = %run_id,
                error = %e,
                "Auto-cancel run aborted: expired-line scan failed"
            );
            SchedulerError::Scan(e.to_string())
        })?;

        let deadline = self.run_timeout.map(|t| Instant::now() + t);
        let total = lines.len();
        let mut results = Vec::with_capacity(total);

        for (idx, line) in lines.iter().enumerate() {
            // Checked between lines only; a started terminate runs to completion.
            let (result, dispatched) = if deadline.is_some_and(|d| Instant::now() >= d) {
                (CancellationResult::failed(line, None, DEADLINE_EXCEEDED), false)
            } else {
                self.cancel_line(line).await
            };

            if let Some(ref error) = result.error {
                tracing::warn!(
                    run_id = %run_id,
                    customer_device_id = %line.customer_device_id,
                    device_id = %line.device_id,
                    error = %error,
                    "Line cancellation failed"
                );
            }
            results.push(result);

            if dispatched && idx + 1 < total && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let summary = RunSummary {
            run_id,
            trigger,
            started_at,
            finished_at: Utc::now(),
            total,
            succeeded,
            failed: total - succeeded,
            results,
        };

        tracing::info!(
            run_id = %summary.run_id,
            trigger = trigger.as_str(),
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Auto-cancel run finished"
        );

        *self.last_run.lock() = Some(summary.clone());
        Ok(summary)
    }

    /// Terminate one line. The flag is true when an upstream call was made,
    /// which is what the inter-item delay paces.
    async fn cancel_line(&self, line: &ExpiredLine) -> (CancellationResult, bool) {
        let device = match self.devices.device(&line.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => return (CancellationResult::failed(line, None, DEVICE_NOT_FOUND), false),
            Err(e) => {
                return (
                    CancellationResult::failed(line, None, format!("device lookup failed: {e}")),
                    false,
                )
            }
        };

        let Some(endpoint_id) = device.endpoint_id.as_ref() else {
            return (
                CancellationResult::failed(line, device.device_number, NO_ENDPOINT),
                false,
            );
        };

        match self
            .dispatcher
            .send_action(Some(endpoint_id), Some(&DeviceAction::Terminate))
            .await
        {
            Ok(_) => {
                tracing::info!(
                    customer_device_id = %line.customer_device_id,
                    endpoint_id = %endpoint_id,
                    plan_end_date = %line.plan_end_date,
                    "Expired line terminated"
                );
                (CancellationResult::succeeded(line, device.device_number), true)
            }
            Err(e) => (
                CancellationResult::failed(line, device.device_number, e.to_string()),
                true,
            ),
        }
    }

    /// Fire [`run_once`](Self::run_once) on every schedule tick until
    /// `shutdown` flips to true.
    pub async fn run_forever(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            schedule = self.schedule.expression(),
            timezone = self.schedule.timezone().name(),
            "Auto-cancel scheduler started"
        );

        loop {
            let Some(next) = self.schedule.next_after(Utc::now()) else {
                tracing::warn!("Auto-cancel schedule has no future fire times; stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tracing::debug!(next_run = %next, "Auto-cancel sleeping until next run");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Auto-cancel scheduler stopped");
                        return;
                    }
                    continue;
                }
            }

            match self.run_once(RunTrigger::Cron).await {
                Ok(_) => {}
                Err(SchedulerError::AlreadyRunning) => {
                    tracing::warn!("Skipping scheduled auto-cancel run: previous run still active");
                }
                Err(e) => tracing::error!(error = %e, "Scheduled auto-cancel run failed"),
            }
        }
    }
}
