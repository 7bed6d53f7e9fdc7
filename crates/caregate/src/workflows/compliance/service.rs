use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{error, info, warn};

use super::domain::{
    AccountId, AccountView, BillingAccount, LockState, LockTransition, PaymentEvent,
    PaymentStatus,
};
use super::escalation::ComplianceError;
use super::repository::AccountRepository;
use crate::access::{self, AccountRole, Capability};
use crate::audit::{Actor, AuditAction, AuditLogEntry, AuditTrail, EntityKind};
use crate::clock::Clock;
use crate::config::ComplianceConfig;
use crate::notify::{templates, Notification, NotificationDispatcher};
use crate::persistence::{RepositoryError, Versioned};

/// Service applying the lock automaton to stored accounts.
pub struct ComplianceService<R> {
    repository: Arc<R>,
    audit: Arc<dyn AuditTrail>,
    notifications: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    unlock_grace_days: u32,
}

static ACCOUNT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_account_id() -> AccountId {
    let id = ACCOUNT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AccountId(format!("acct-{id:06}"))
}

/// Result of one `tick`: the stored account and the transition, if any.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub account: Versioned<BillingAccount>,
    pub transition: Option<LockTransition>,
}

struct Change {
    action: AuditAction,
    actor: Actor,
    reason: Option<String>,
    notification: Option<Notification>,
}

impl<R> ComplianceService<R>
where
    R: AccountRepository + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<dyn AuditTrail>,
        notifications: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: &ComplianceConfig,
    ) -> Self {
        Self {
            repository,
            audit,
            notifications,
            clock,
            unlock_grace_days: config.unlock_grace_days,
        }
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        self.notifications.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn open_account(
        &self,
        owner_id: &str,
        role: AccountRole,
    ) -> Result<Versioned<BillingAccount>, ComplianceError> {
        let now = self.clock.now();
        let account = BillingAccount::new(next_account_id(), owner_id, role, now);
        let stored = self.repository.insert(account)?;

        self.append_audit(
            AuditLogEntry::new(
                &Actor::system(),
                AuditAction::AccountOpened,
                EntityKind::BillingAccount,
                stored.value.id.0.clone(),
                now,
            )
            .states("", stored.value.lock_state.label()),
        );
        info!(
            account_id = %stored.value.id,
            owner_id,
            role = role.label(),
            "billing account opened"
        );
        Ok(stored)
    }

    pub fn issue_invoice(
        &self,
        account_id: &AccountId,
        invoice_id: &str,
        amount: u64,
        due_date: NaiveDate,
    ) -> Result<Versioned<BillingAccount>, ComplianceError> {
        self.commit(account_id, |account, _| {
            account.issue_invoice(invoice_id, amount, due_date)?;
            Ok(Some(Change {
                action: AuditAction::InvoiceIssued,
                actor: Actor::system(),
                reason: Some(format!("invoice {invoice_id} for {amount} due {due_date}")),
                notification: None,
            }))
        })
    }

    /// Bring the account's lock state up to date for `today`. Idempotent per day bucket.
    pub fn tick(
        &self,
        account_id: &AccountId,
        today: NaiveDate,
    ) -> Result<TickOutcome, ComplianceError> {
        let mut transition = None;
        let account = self.commit(account_id, |account, _| {
            let Some(escalation) = account.escalate(today) else {
                return Ok(None);
            };
            transition = Some(escalation);
            Ok(Some(Change {
                action: AuditAction::LockEscalated,
                actor: Actor::system(),
                reason: Some(format!("{} days overdue", escalation.days_overdue)),
                notification: Some(escalation_notice(account, &escalation)),
            }))
        })?;

        if let Some(escalation) = &transition {
            record_lock_transition(escalation.from, escalation.to);
        }

        Ok(TickOutcome {
            account,
            transition,
        })
    }

    pub fn settle_payment(
        &self,
        account_id: &AccountId,
        payment_ref: &str,
        amount: u64,
    ) -> Result<Versioned<BillingAccount>, ComplianceError> {
        let mut previous = None;
        let stored = self.commit(account_id, |account, _| {
            let settlement = account.settle(amount)?;
            previous = Some(settlement.previous);
            Ok(Some(Change {
                action: AuditAction::PaymentSettled,
                actor: Actor::payment_gateway(payment_ref),
                reason: Some(format!(
                    "payment {payment_ref} of {amount} settled invoice {}",
                    settlement.invoice_id
                )),
                notification: Some(
                    Notification::new(&account.owner_id, templates::PAYMENT_CONFIRMED)
                        .param("invoice_id", &settlement.invoice_id)
                        .param("amount_paid", settlement.amount_paid)
                        .param("payment_ref", payment_ref),
                ),
            }))
        })?;

        if let Some(previous) = previous {
            record_lock_transition(previous, LockState::Current);
        }
        Ok(stored)
    }

    /// Administrative override. A blank reason is refused and the attempt is audited.
    pub fn manual_unlock(
        &self,
        account_id: &AccountId,
        admin_id: &str,
        reason: &str,
    ) -> Result<Versioned<BillingAccount>, ComplianceError> {
        let reason = reason.trim();
        let actor = Actor::administrator(admin_id);

        if reason.is_empty() {
            let stored = self.get_account(account_id)?;
            let state = stored.value.lock_state.label();
            warn!(
                account_id = %account_id,
                admin_id,
                lock_state = state,
                "manual unlock refused: empty reason"
            );
            self.append_audit(
                AuditLogEntry::new(
                    &actor,
                    AuditAction::AttemptedUnlockDenied,
                    EntityKind::BillingAccount,
                    account_id.0.clone(),
                    self.clock.now(),
                )
                .states(state, state),
            );
            return Err(ComplianceError::InvalidReason);
        }

        let grace_days = self.unlock_grace_days;
        let mut unlocked_from = None;
        let stored = self.commit(account_id, |account, today| {
            let previous = account.unlock(today, grace_days);
            unlocked_from = Some(previous);
            Ok(Some(Change {
                action: AuditAction::ManualUnlock,
                actor,
                reason: Some(reason.to_string()),
                notification: Some(
                    Notification::new(&account.owner_id, templates::ACCOUNT_UNLOCKED)
                        .param("previous_state", previous.label())
                        .param(
                            "invoice_id",
                            account.outstanding_invoice_id.as_deref().unwrap_or_default(),
                        ),
                ),
            }))
        })?;

        if let Some(previous) = unlocked_from {
            record_lock_transition(previous, LockState::Current);
        }
        Ok(stored)
    }

    /// Translate a payment-gateway webhook. Failed payments are logged and change nothing.
    pub fn handle_payment_event(
        &self,
        event: &PaymentEvent,
    ) -> Result<Option<Versioned<BillingAccount>>, ComplianceError> {
        match event.status {
            PaymentStatus::Succeeded => self
                .settle_payment(&event.account_id, &event.payment_ref, event.amount)
                .map(Some),
            PaymentStatus::Failed => {
                warn!(
                    account_id = %event.account_id,
                    payment_ref = %event.payment_ref,
                    amount = event.amount,
                    "payment failed at gateway; account unchanged"
                );
                Ok(None)
            }
        }
    }

    pub fn get_account(
        &self,
        account_id: &AccountId,
    ) -> Result<Versioned<BillingAccount>, ComplianceError> {
        self.repository
            .fetch(account_id)?
            .ok_or_else(|| ComplianceError::NotFound(account_id.clone()))
    }

    pub fn account_view(&self, account_id: &AccountId) -> Result<AccountView, ComplianceError> {
        let stored = self.get_account(account_id)?;
        let summary = access::restriction_summary(stored.value.role, stored.value.lock_state);
        Ok(stored.value.status_view(
            stored.version,
            self.clock.today(),
            summary.allowed,
            summary.denied,
        ))
    }

    pub fn allowed_capabilities(
        &self,
        account_id: &AccountId,
    ) -> Result<BTreeSet<Capability>, ComplianceError> {
        let stored = self.get_account(account_id)?;
        Ok(access::allowed_capabilities(
            stored.value.role,
            stored.value.lock_state,
        ))
    }

    pub fn account_history(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<AuditLogEntry>, ComplianceError> {
        self.get_account(account_id)?;
        Ok(self
            .audit
            .entries_for(EntityKind::BillingAccount, &account_id.0)?)
    }

    /// One page of accounts with an unpaid invoice, keyed after `after`.
    pub fn accounts_with_outstanding_invoice(
        &self,
        after: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<Versioned<BillingAccount>>, ComplianceError> {
        Ok(self.repository.with_outstanding_invoice(after, limit)?)
    }

    /// Load, mutate, and save one account under its version, then audit and notify.
    fn commit<F>(
        &self,
        account_id: &AccountId,
        apply: F,
    ) -> Result<Versioned<BillingAccount>, ComplianceError>
    where
        F: FnOnce(&mut BillingAccount, NaiveDate) -> Result<Option<Change>, ComplianceError>,
    {
        let now = self.clock.now();
        let Versioned {
            version,
            value: mut account,
        } = self.get_account(account_id)?;

        let before = account.lock_state;
        let Some(change) = apply(&mut account, now.date_naive())? else {
            return Ok(Versioned::new(version, account));
        };
        let after = account.lock_state;

        let version = self
            .repository
            .save(account.clone(), version)
            .map_err(|err| match err {
                RepositoryError::VersionConflict { .. } => ComplianceError::StaleState {
                    account_id: account_id.clone(),
                },
                other => ComplianceError::Repository(other),
            })?;

        self.append_audit(
            AuditLogEntry::new(
                &change.actor,
                change.action,
                EntityKind::BillingAccount,
                account_id.0.clone(),
                now,
            )
            .states(before.label(), after.label())
            .reason(change.reason),
        );

        info!(
            account_id = %account_id,
            action = change.action.label(),
            actor_id = %change.actor.id,
            from = before.label(),
            to = after.label(),
            version,
            "billing account transitioned"
        );

        if let Some(notification) = change.notification {
            self.notifications.dispatch(notification, now);
        }

        Ok(Versioned::new(version, account))
    }

    fn append_audit(&self, entry: AuditLogEntry) {
        if let Err(err) = self.audit.append(entry.clone()) {
            error!(
                entity_id = %entry.entity_id,
                action = entry.action.label(),
                error = %err,
                "audit append failed for billing account"
            );
        }
    }
}

fn escalation_notice(account: &BillingAccount, transition: &LockTransition) -> Notification {
    let template = match transition.to {
        LockState::Current | LockState::Reminder3 => templates::REMINDER_DAY_3,
        LockState::Reminder5 => templates::REMINDER_DAY_5,
        LockState::FinalWarning6 => templates::FINAL_WARNING_DAY_6,
        LockState::Locked => templates::ACCOUNT_LOCKED,
    };

    Notification::new(&account.owner_id, template)
        .param(
            "invoice_id",
            account.outstanding_invoice_id.as_deref().unwrap_or_default(),
        )
        .param("amount_due", account.amount_due)
        .param("days_overdue", transition.days_overdue)
        .param("lock_state", transition.to.label())
}

/// Count a lock-state change; settling or unlocking an account that is already current is
/// not one.
fn record_lock_transition(from: LockState, to: LockState) {
    if from != to {
        metrics::counter!("caregate_lock_transitions_total", "to" => to.label()).increment(1);
    }
}
