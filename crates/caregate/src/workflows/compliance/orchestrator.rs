//! Billing-cycle ticker.
//!
//! Walks every account with an unpaid invoice, page by page, and applies one escalation
//! check for the current day. Because escalation is idempotent per day bucket, a cycle that
//! runs twice in one day, or an account touched concurrently, is harmless.
//!
//! A cycle is synchronous and talks to the repository and notifier directly, so the
//! background loop runs each one on the blocking pool.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::NaiveDate;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::domain::{AccountId, LockState, PaymentEvent};
use super::escalation::ComplianceError;
use super::repository::AccountRepository;
use super::service::ComplianceService;
use crate::config::ComplianceConfig;
use crate::error::ErrorKind;
use crate::notify::RetrySummary;

/// Counters from one billing cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceSweep {
    pub scanned: usize,
    pub escalated: usize,
    pub locked: usize,
    pub skipped_stale: usize,
    pub failed: usize,
    pub notifications: RetrySummary,
}

pub struct ComplianceOrchestrator<R> {
    service: Arc<ComplianceService<R>>,
    period: StdDuration,
    batch_size: usize,
}

impl<R> ComplianceOrchestrator<R>
where
    R: AccountRepository + 'static,
{
    pub fn new(service: Arc<ComplianceService<R>>, config: &ComplianceConfig) -> Self {
        Self {
            service,
            period: StdDuration::from_secs(config.tick_interval_secs.max(1)),
            batch_size: config.tick_batch_size.max(1),
        }
    }

    pub fn run_cycle(&self) -> Result<ComplianceSweep, ComplianceError> {
        let now = self.service.now();
        let today = now.date_naive();
        let mut sweep = ComplianceSweep::default();
        let mut cursor: Option<AccountId> = None;

        loop {
            let page = self
                .service
                .accounts_with_outstanding_invoice(cursor.as_ref(), self.batch_size)?;
            let exhausted = page.len() < self.batch_size;

            for stored in page {
                sweep.scanned += 1;
                let account_id = stored.value.id;
                self.tick_one(&account_id, today, &mut sweep);
                cursor = Some(account_id);
            }

            if exhausted {
                break;
            }
        }

        sweep.notifications = self.service.notifications().retry_due(now);
        Ok(sweep)
    }

    fn tick_one(&self, account_id: &AccountId, today: NaiveDate, sweep: &mut ComplianceSweep) {
        match self.service.tick(account_id, today) {
            Ok(outcome) => {
                if let Some(transition) = outcome.transition {
                    sweep.escalated += 1;
                    if transition.to == LockState::Locked {
                        sweep.locked += 1;
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::StaleState => {
                debug!(
                    account_id = %account_id,
                    "account changed mid-cycle; retrying next cycle"
                );
                sweep.skipped_stale += 1;
            }
            Err(err) => {
                warn!(account_id = %account_id, error = %err, "billing tick failed");
                sweep.failed += 1;
            }
        }
    }

    /// Forward a gateway event to the service.
    pub fn on_payment_event(&self, event: &PaymentEvent) -> Result<bool, ComplianceError> {
        Ok(self.service.handle_payment_event(event)?.is_some())
    }

    /// Spawn the periodic billing cycle; it stops when `shutdown` is cancelled.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                period_secs = self.period.as_secs(),
                "starting compliance orchestrator"
            );
            let mut tick = interval(self.period);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let orchestrator = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || orchestrator.run_cycle()).await {
                            Ok(Ok(sweep)) => info!(
                                scanned = sweep.scanned,
                                escalated = sweep.escalated,
                                locked = sweep.locked,
                                skipped_stale = sweep.skipped_stale,
                                failed = sweep.failed,
                                "billing cycle completed"
                            ),
                            Ok(Err(err)) => warn!(error = %err, "billing cycle failed"),
                            Err(err) => error!(error = %err, "billing cycle task aborted"),
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("shutdown signal received, stopping compliance orchestrator");
                        break;
                    }
                }
            }
        })
    }
}
