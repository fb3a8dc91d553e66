//! Cron trigger tasks
//!
//! Every armed schedule owns one tokio task that sleeps until the next fire
//! time and hands a start request to the runner. Fires never block the
//! trigger: each start is awaited on its own task so slow starts cannot
//! delay the next tick.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cron::CronSchedule;
use super::definition::ScheduleConfig;
use crate::runner::{RunnerHandle, StartOptions};

#[derive(Debug, Default)]
struct FireTimes {
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Counters shared between a schedule entry and its trigger task
#[derive(Debug, Default)]
pub(crate) struct ScheduleCounters {
    runs: AtomicU64,
    errors: AtomicU64,
    skipped: AtomicU64,
    in_flight: AtomicU32,
    times: Mutex<FireTimes>,
}

impl ScheduleCounters {
    pub(crate) fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub(crate) fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().last_run_at
    }

    pub(crate) fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.times.lock().next_run_at
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.times.lock().last_error.clone()
    }

    fn set_next_run(&self, at: Option<DateTime<Utc>>) {
        self.times.lock().next_run_at = at;
    }

    fn record_fire(&self, at: DateTime<Utc>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.times.lock().last_run_at = Some(at);
    }

    fn record_error(&self, message: String) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.times.lock().last_error = Some(message);
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to a running trigger task
#[derive(Debug)]
pub(crate) struct Trigger {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Trigger {
    pub(crate) fn arm(
        schedule: ScheduleConfig,
        cron: CronSchedule,
        counters: Arc<ScheduleCounters>,
        runner: RunnerHandle,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(schedule, cron, counters, runner, stop_rx));
        Self { stop_tx, handle }
    }

    /// Signal the task to exit; in-flight starts run to completion
    pub(crate) fn disarm(self) {
        let _ = self.stop_tx.send(true);
    }

    /// The task ended on its own (window closed or execution cap reached)
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(
    schedule: ScheduleConfig,
    cron: CronSchedule,
    counters: Arc<ScheduleCounters>,
    runner: RunnerHandle,
    mut stop_rx: watch::Receiver<bool>,
) {
    // Fire times advance from the previous fire so a tick is never produced
    // twice. Deadlines are measured on the tokio clock from one anchor.
    let anchor_utc = Utc::now();
    let anchor = Instant::now();
    let mut cursor = anchor_utc;

    loop {
        if let Some(max) = schedule.max_executions {
            if counters.runs() >= max {
                info!(schedule_id = %schedule.id, max_executions = max, "execution cap reached, trigger retired");
                break;
            }
        }

        let from = match schedule.start_at {
            Some(start) if start > cursor => start - chrono::Duration::seconds(1),
            _ => cursor,
        };
        let Some(next) = cron.next_after(&from) else {
            warn!(schedule_id = %schedule.id, cron = %cron, "no future fire time");
            break;
        };
        if schedule.end_at.is_some_and(|end| next > end) {
            info!(schedule_id = %schedule.id, "schedule window closed, trigger retired");
            break;
        }

        counters.set_next_run(Some(next));
        let offset = (next - anchor_utc).to_std().unwrap_or(Duration::ZERO);
        debug!(schedule_id = %schedule.id, next_run_at = %next, "trigger armed");

        tokio::select! {
            _ = tokio::time::sleep_until(anchor + offset) => {}
            _ = stop_rx.changed() => {
                debug!(schedule_id = %schedule.id, "trigger disarmed");
                break;
            }
        }

        cursor = next;
        fire(&schedule, &counters, &runner, next);
    }

    counters.set_next_run(None);
}

fn fire(
    schedule: &ScheduleConfig,
    counters: &Arc<ScheduleCounters>,
    runner: &RunnerHandle,
    at: DateTime<Utc>,
) {
    let in_flight = counters.in_flight();
    if in_flight >= schedule.max_concurrent {
        counters.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(
            schedule_id = %schedule.id,
            in_flight,
            max_concurrent = schedule.max_concurrent,
            "previous runs still active, tick skipped"
        );
        return;
    }

    counters.record_fire(at);

    let (finish_tx, finish_rx) = oneshot::channel();
    let options = StartOptions::new()
        .with_retry(schedule.retry_policy())
        .with_timeout(schedule.timeout_policy())
        .with_source(format!("schedule:{}", schedule.id))
        .notify_on_finish(finish_tx);

    let schedule_id = schedule.id.clone();
    let workflow_id = schedule.workflow.workflow_id();
    let version = schedule.workflow.version.clone();
    let input = schedule.input.clone();
    let counters = Arc::clone(counters);
    let runner = runner.clone();

    tokio::spawn(async move {
        match runner.request_start(&workflow_id, &version, input, options).await {
            Ok(started) => {
                info!(
                    schedule_id = %schedule_id,
                    instance_id = %started.instance_id,
                    workflow_id = %workflow_id,
                    "scheduled workflow started"
                );
                // A dropped sender means the runner stopped tracking the instance.
                let _ = finish_rx.await;
            }
            Err(e) => {
                warn!(schedule_id = %schedule_id, workflow_id = %workflow_id, error = %e, "scheduled start failed");
                counters.record_error(e.to_string());
            }
        }
        counters.release();
    });
}
