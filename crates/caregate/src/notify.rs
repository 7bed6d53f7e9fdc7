//! Outbound SMS/e-mail notifications.
//!
//! Engines hand notifications to a [`NotificationDispatcher`] only after the triggering
//! transition has been committed. A failed send is logged and parked in an outbox that the
//! orchestrators drain with exponential backoff; it never feeds back into engine state.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::config::NotificationConfig;

pub mod templates {
    pub const STAGE_APPROVED: &str = "verification.stage_approved";
    pub const STAGE_SENT_BACK: &str = "verification.stage_sent_back";
    pub const CASE_APPROVED: &str = "verification.case_approved";
    pub const CASE_REJECTED: &str = "verification.case_rejected";
    pub const CASE_REOPENED: &str = "verification.case_reopened";
    pub const INTERVIEW_SCHEDULED: &str = "verification.interview_scheduled";
    pub const INTERVIEW_MISSED: &str = "verification.interview_missed";
    pub const EVIDENCE_EXPIRED: &str = "verification.evidence_expired";
    pub const REMINDER_DAY_3: &str = "billing.reminder_day_3";
    pub const REMINDER_DAY_5: &str = "billing.reminder_day_5";
    pub const FINAL_WARNING_DAY_6: &str = "billing.final_warning_day_6";
    pub const ACCOUNT_LOCKED: &str = "billing.account_locked";
    pub const PAYMENT_CONFIRMED: &str = "billing.payment_confirmed";
    pub const ACCOUNT_UNLOCKED: &str = "billing.account_unlocked";
}

/// Notification payload addressed to a marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_id: String,
    pub template: String,
    pub params: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(recipient_id: impl Into<String>, template: &str) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            template: template.to_string(),
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

/// SMS/e-mail transport.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
    #[error("recipient {0} cannot be reached")]
    Unreachable(String),
}

const BACKOFF_CEILING_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone)]
struct PendingNotification {
    notification: Notification,
    attempts: u32,
    next_attempt_at: DateTime<Utc>,
}

/// Counts from one pass over the retry outbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub delivered: usize,
    pub rescheduled: usize,
    pub abandoned: usize,
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    outbox: Mutex<VecDeque<PendingNotification>>,
    config: NotificationConfig,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, config: NotificationConfig) -> Self {
        Self {
            notifier,
            outbox: Mutex::new(VecDeque::new()),
            config,
        }
    }

    /// Attempt delivery once; on failure the notification is parked for retry.
    pub fn dispatch(&self, notification: Notification, now: DateTime<Utc>) {
        if let Err(err) = self.notifier.send(&notification) {
            warn!(
                recipient = %notification.recipient_id,
                template = %notification.template,
                error = %err,
                "notification failed; queued for retry"
            );
            metrics::counter!("caregate_notifications_failed_total").increment(1);
            self.park(notification, 1, now);
        }
    }

    /// Retry every parked notification whose backoff has elapsed.
    pub fn retry_due(&self, now: DateTime<Utc>) -> RetrySummary {
        let due: Vec<PendingNotification> = {
            let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
            let (due, waiting): (VecDeque<_>, VecDeque<_>) = outbox
                .drain(..)
                .partition(|pending| pending.next_attempt_at <= now);
            *outbox = waiting;
            due.into_iter().collect()
        };

        let mut summary = RetrySummary::default();
        for pending in due {
            match self.notifier.send(&pending.notification) {
                Ok(()) => summary.delivered += 1,
                Err(err) if pending.attempts + 1 >= self.config.max_attempts => {
                    error!(
                        recipient = %pending.notification.recipient_id,
                        template = %pending.notification.template,
                        attempts = pending.attempts + 1,
                        error = %err,
                        "notification abandoned after final attempt"
                    );
                    summary.abandoned += 1;
                }
                Err(err) => {
                    warn!(
                        recipient = %pending.notification.recipient_id,
                        template = %pending.notification.template,
                        attempts = pending.attempts + 1,
                        error = %err,
                        "notification retry failed"
                    );
                    self.park(pending.notification, pending.attempts + 1, now);
                    summary.rescheduled += 1;
                }
            }
        }

        summary
    }

    /// Number of notifications waiting for another attempt.
    pub fn pending(&self) -> usize {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn park(&self, notification: Notification, attempts: u32, now: DateTime<Utc>) {
        if attempts >= self.config.max_attempts {
            error!(
                recipient = %notification.recipient_id,
                template = %notification.template,
                "notification dropped; retry budget exhausted"
            );
            return;
        }

        let next_attempt_at = now + self.backoff(attempts);
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PendingNotification {
                notification,
                attempts,
                next_attempt_at,
            });
    }

    fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let secs = self
            .config
            .base_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_secs)
            .min(BACKOFF_CEILING_SECS);
        Duration::seconds(secs as i64)
    }
}
