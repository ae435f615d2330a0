//! Timer-driven retry processing loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use folio_moderation::FailureDisposition;

use crate::operations::OperationStore;
use crate::pipeline::dispatcher::{DispatchOutcome, Dispatcher};

/// Aggregate outcome of one runner pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunReport {
    /// A run was already in progress; this tick did nothing.
    pub skipped: bool,
    pub fetched: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub permanent_failures: usize,
    /// Claims returned untouched (in-process double-dispatch guard).
    pub released: usize,
    /// Store writes that failed while recording outcomes.
    pub store_errors: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn errors(&self) -> usize {
        self.rescheduled + self.exhausted + self.permanent_failures + self.store_errors
    }
}

/// Periodic driver: pulls due operations in priority order, feeds them to
/// the dispatcher in bounded batches, and records every outcome.
pub struct RetryRunner {
    store: Arc<dyn OperationStore>,
    dispatcher: Arc<Dispatcher>,
    batch_size: usize,
    inter_batch_pause: Duration,
    /// At most one run per process at a time; an overlapping timer tick is
    /// skipped, not queued.
    is_processing: AtomicBool,
}

impl RetryRunner {
    pub fn new(
        store: Arc<dyn OperationStore>,
        dispatcher: Arc<Dispatcher>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            batch_size: batch_size.max(1),
            inter_batch_pause: Duration::from_secs(1),
            is_processing: AtomicBool::new(false),
        }
    }

    /// Shorten the pause between batches (tests).
    pub fn with_inter_batch_pause(mut self, pause: Duration) -> Self {
        self.inter_batch_pause = pause;
        self
    }

    /// Run one processing pass. Also the manual/administrative entry point.
    pub async fn run_once(&self) -> RunReport {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            debug!("retry run already in progress; skipping tick");
            return RunReport {
                skipped: true,
                ..RunReport::default()
            };
        }

        let report = self.run_inner().await;
        self.is_processing.store(false, Ordering::SeqCst);
        report
    }

    async fn run_inner(&self) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::default();

        // Pull a larger candidate set, then work it in bounded chunks so a
        // burst of due operations cannot overwhelm downstream dependencies.
        let candidates = match self.store.fetch_due(self.batch_size * 3).await {
            Ok(candidates) => candidates,
            Err(e) => {
                // Only this failure aborts the whole run; the next tick
                // starts over.
                error!(error = %e, "failed to fetch due operations; aborting run");
                report.store_errors += 1;
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };
        report.fetched = candidates.len();

        if candidates.is_empty() {
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        for (index, chunk) in candidates.chunks(self.batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_batch_pause).await;
            }
            for operation in chunk {
                self.process_one(operation, &mut report).await;
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        let throughput = if report.elapsed_ms == 0 {
            report.processed as f64
        } else {
            report.processed as f64 * 1000.0 / report.elapsed_ms as f64
        };
        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            errors = report.errors(),
            elapsed_ms = report.elapsed_ms,
            throughput_per_s = format!("{throughput:.1}"),
            "retry run finished"
        );
        report
    }

    async fn process_one(
        &self,
        operation: &folio_moderation::RetryOperation,
        report: &mut RunReport,
    ) {
        report.processed += 1;
        match self.dispatcher.process(operation).await {
            DispatchOutcome::Success => {
                if let Err(e) = self.store.mark_completed(operation.id, None).await {
                    error!(operation_id = %operation.id, error = %e, "failed to record completion");
                    report.store_errors += 1;
                    return;
                }
                report.succeeded += 1;
            }
            DispatchOutcome::AlreadyProcessing => {
                // Return the claim untouched; the original attempt owns it.
                if let Err(e) = self.store.release(operation.id).await {
                    error!(operation_id = %operation.id, error = %e, "failed to release claim");
                    report.store_errors += 1;
                    return;
                }
                report.released += 1;
            }
            DispatchOutcome::Failure { error, permanent: true } => {
                error!(
                    operation_id = %operation.id,
                    kind = operation.kind.name(),
                    error = %error,
                    "operation failed permanently; flagged for manual review"
                );
                if let Err(e) = self.store.fail_permanent(operation.id, &error).await {
                    error!(operation_id = %operation.id, error = %e, "failed to record failure");
                    report.store_errors += 1;
                    return;
                }
                report.permanent_failures += 1;
            }
            DispatchOutcome::Failure { error, permanent: false } => {
                match self.store.schedule_retry(operation.id, &error).await {
                    Ok(FailureDisposition::Rescheduled(next_at)) => {
                        warn!(
                            operation_id = %operation.id,
                            kind = operation.kind.name(),
                            error = %error,
                            next_retry_at = %next_at,
                            "operation failed; rescheduled"
                        );
                        report.rescheduled += 1;
                    }
                    Ok(FailureDisposition::Exhausted) => {
                        error!(
                            operation_id = %operation.id,
                            kind = operation.kind.name(),
                            error = %error,
                            "operation exhausted retries; flagged for manual review"
                        );
                        report.exhausted += 1;
                    }
                    Err(e) => {
                        error!(operation_id = %operation.id, error = %e, "failed to schedule retry");
                        report.store_errors += 1;
                    }
                }
            }
        }
    }

    /// Start the timer-driven loop. The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let runner = self;
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "retry runner started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                runner.run_once().await;
            }
        })
    }

    /// Start the retention cleanup timer.
    pub fn spawn_cleanup(
        store: Arc<dyn OperationStore>,
        retention_days: u32,
        every: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.purge_terminal(retention_days).await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "purged terminal operations"),
                    Err(e) => error!(error = %e, "failed to purge terminal operations"),
                }
            }
        })
    }
}
