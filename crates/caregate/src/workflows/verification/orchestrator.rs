//! Scheduled sweep over open verification cases.
//!
//! Each cycle reconciles booked interviews against the scheduling collaborator, downgrades
//! lapsed evidence, and drains the notification retry outbox. A case that another writer
//! touched mid-cycle is skipped and picked up again on the next cycle. Cases are walked in
//! id-ordered pages until the set is exhausted, and the whole cycle runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::domain::{CaseId, StageStatus, VerificationCase};
use super::pipeline::VerificationError;
use super::repository::{CaseRepository, InterviewScheduler, InterviewStatus};
use super::service::VerificationService;
use crate::config::VerificationConfig;
use crate::error::ErrorKind;
use crate::notify::RetrySummary;

/// Counters from one orchestrator cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerificationSweep {
    pub scanned: usize,
    pub interviews_completed: usize,
    pub interviews_released: usize,
    pub evidence_expired: usize,
    pub skipped_stale: usize,
    pub failed: usize,
    pub notifications: RetrySummary,
}

pub struct VerificationOrchestrator<R, S> {
    service: Arc<VerificationService<R, S>>,
    interview_grace: Duration,
    period: StdDuration,
    batch_size: usize,
}

impl<R, S> VerificationOrchestrator<R, S>
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    pub fn new(service: Arc<VerificationService<R, S>>, config: &VerificationConfig) -> Self {
        Self {
            service,
            interview_grace: Duration::minutes(i64::from(config.interview_grace_minutes)),
            period: StdDuration::from_secs(config.sweep_interval_secs.max(1)),
            batch_size: config.sweep_batch_size.max(1),
        }
    }

    /// Run one sweep at the service clock's current time.
    pub fn run_cycle(&self) -> Result<VerificationSweep, VerificationError> {
        let now = self.service.now();
        let mut sweep = VerificationSweep::default();
        let mut cursor: Option<CaseId> = None;

        loop {
            let page = self.service.active_cases(cursor.as_ref(), self.batch_size)?;
            let exhausted = page.len() < self.batch_size;

            for stored in page {
                sweep.scanned += 1;
                let case = stored.value;
                self.sweep_case(&case, now, &mut sweep);
                cursor = Some(case.id);
            }

            if exhausted {
                break;
            }
        }

        sweep.notifications = self.service.notifications().retry_due(now);
        Ok(sweep)
    }

    /// Spawn the periodic sweep; it stops when `shutdown` is cancelled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                period_secs = self.period.as_secs(),
                "starting verification orchestrator"
            );
            let mut tick = interval(self.period);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let orchestrator = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || orchestrator.run_cycle()).await {
                            Ok(Ok(sweep)) => info!(
                                scanned = sweep.scanned,
                                interviews_completed = sweep.interviews_completed,
                                interviews_released = sweep.interviews_released,
                                evidence_expired = sweep.evidence_expired,
                                skipped_stale = sweep.skipped_stale,
                                failed = sweep.failed,
                                "verification sweep completed"
                            ),
                            Ok(Err(err)) => warn!(error = %err, "verification sweep failed"),
                            Err(err) => error!(error = %err, "verification sweep task aborted"),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("shutdown signal received, stopping verification orchestrator");
                        break;
                    }
                }
            }
        })
    }

    fn sweep_case(
        &self,
        case: &VerificationCase,
        now: DateTime<Utc>,
        sweep: &mut VerificationSweep,
    ) {
        if let Err(err) = self.reconcile_interview(case, now, sweep) {
            self.record_failure(&case.id, "interview reconciliation", err, sweep);
        }

        match self.service.expire_stale_evidence(&case.id) {
            Ok(Some(_)) => sweep.evidence_expired += 1,
            Ok(None) => {}
            Err(err) => self.record_failure(&case.id, "evidence expiry", err, sweep),
        }
    }

    fn reconcile_interview(
        &self,
        case: &VerificationCase,
        now: DateTime<Utc>,
        sweep: &mut VerificationSweep,
    ) -> Result<(), VerificationError> {
        let Some(stage) = case.current_stage() else {
            return Ok(());
        };
        let Some(booking) = stage
            .interview
            .as_ref()
            .filter(|_| stage.status == StageStatus::Scheduled)
        else {
            return Ok(());
        };

        match self.service.scheduler().interview_status(&booking.slot_id)? {
            InterviewStatus::Occurred => {
                self.service.complete_interview(&case.id)?;
                sweep.interviews_completed += 1;
            }
            InterviewStatus::Missed => {
                self.service.release_missed_interview(&case.id)?;
                sweep.interviews_released += 1;
            }
            InterviewStatus::Pending if now >= booking.starts_at + self.interview_grace => {
                self.service.release_missed_interview(&case.id)?;
                sweep.interviews_released += 1;
            }
            InterviewStatus::Pending => {}
        }
        Ok(())
    }

    fn record_failure(
        &self,
        case_id: &CaseId,
        step: &'static str,
        err: VerificationError,
        sweep: &mut VerificationSweep,
    ) {
        if err.kind() == ErrorKind::StaleState {
            debug!(case_id = %case_id, step, "case changed mid-sweep; retrying next cycle");
            sweep.skipped_stale += 1;
        } else {
            warn!(case_id = %case_id, step, error = %err, "verification sweep step failed");
            sweep.failed += 1;
        }
    }
}
