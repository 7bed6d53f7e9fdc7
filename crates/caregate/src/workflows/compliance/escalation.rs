//! Lock-state automaton for a single billing account.

use chrono::{Duration, NaiveDate};

use super::domain::{AccountId, BillingAccount, LockState, LockTransition};
use crate::audit::AuditError;
use crate::error::ErrorKind;
use crate::persistence::RepositoryError;

/// Invoice cleared by a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub invoice_id: String,
    pub amount_paid: u64,
    pub previous: LockState,
}

impl BillingAccount {
    pub fn issue_invoice(
        &mut self,
        invoice_id: &str,
        amount: u64,
        due_date: NaiveDate,
    ) -> Result<(), ComplianceError> {
        if let Some(outstanding) = &self.outstanding_invoice_id {
            return Err(ComplianceError::InvoiceOutstanding {
                account_id: self.id.clone(),
                invoice_id: outstanding.clone(),
            });
        }
        let invoice_id = invoice_id.trim();
        if invoice_id.is_empty() {
            return Err(ComplianceError::InvalidInvoice(
                "invoice id must not be blank".to_string(),
            ));
        }
        if amount == 0 {
            return Err(ComplianceError::InvalidInvoice(
                "invoice amount must be positive".to_string(),
            ));
        }

        self.outstanding_invoice_id = Some(invoice_id.to_string());
        self.amount_due = amount;
        self.due_date = Some(due_date);
        self.grace_until = None;
        Ok(())
    }

    /// Move the lock state up to the bucket for `today`.
    ///
    /// Never lowers the state, may skip buckets after a long gap, and does nothing while a
    /// manual-unlock grace window is open. Calling it again on the same day is a no-op.
    pub fn escalate(&mut self, today: NaiveDate) -> Option<LockTransition> {
        if self.outstanding_invoice_id.is_none() || self.in_grace(today) {
            return None;
        }

        let days_overdue = self.days_overdue(today);
        let target = LockState::for_days_overdue(days_overdue);
        if target <= self.lock_state {
            return None;
        }

        let from = self.lock_state;
        self.lock_state = target;
        self.grace_until = None;
        Some(LockTransition {
            from,
            to: target,
            days_overdue,
        })
    }

    /// Full settlement of the outstanding invoice. Partial payments are refused.
    pub fn settle(&mut self, amount: u64) -> Result<Settlement, ComplianceError> {
        let Some(invoice_id) = self.outstanding_invoice_id.clone() else {
            return Err(ComplianceError::NothingOutstanding(self.id.clone()));
        };
        if amount < self.amount_due {
            return Err(ComplianceError::InsufficientAmount {
                account_id: self.id.clone(),
                required: self.amount_due,
                offered: amount,
            });
        }

        let previous = self.lock_state;
        self.lock_state = LockState::Current;
        self.outstanding_invoice_id = None;
        self.amount_due = 0;
        self.due_date = None;
        self.grace_until = None;
        Ok(Settlement {
            invoice_id,
            amount_paid: amount,
            previous,
        })
    }

    /// Administrative override back to `Current`; the invoice stays outstanding and
    /// escalation resumes once the grace window closes.
    pub fn unlock(&mut self, today: NaiveDate, grace_days: u32) -> LockState {
        let previous = self.lock_state;
        self.lock_state = LockState::Current;
        self.grace_until = self
            .outstanding_invoice_id
            .as_ref()
            .map(|_| today + Duration::days(i64::from(grace_days)));
        previous
    }
}

/// Failure of a compliance operation. Nothing is persisted when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum ComplianceError {
    #[error("billing account {0} not found")]
    NotFound(AccountId),
    #[error("payment of {offered} does not cover the {required} due on account {account_id}")]
    InsufficientAmount {
        account_id: AccountId,
        required: u64,
        offered: u64,
    },
    #[error("manual unlock requires a non-empty reason")]
    InvalidReason,
    #[error("account {0} has no outstanding invoice")]
    NothingOutstanding(AccountId),
    #[error("account {account_id} already has invoice {invoice_id} outstanding")]
    InvoiceOutstanding {
        account_id: AccountId,
        invoice_id: String,
    },
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
    #[error("account {account_id} was modified concurrently; reload and retry")]
    StaleState { account_id: AccountId },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl ComplianceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InsufficientAmount { .. } => ErrorKind::InsufficientAmount,
            Self::InvalidReason => ErrorKind::InvalidReason,
            Self::NothingOutstanding(_) => ErrorKind::NothingOutstanding,
            Self::InvoiceOutstanding { .. } => ErrorKind::InvoiceOutstanding,
            Self::InvalidInvoice(_) => ErrorKind::InvalidDefinition,
            Self::StaleState { .. } => ErrorKind::StaleState,
            Self::Repository(RepositoryError::VersionConflict { .. }) => ErrorKind::StaleState,
            Self::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            Self::Repository(_) | Self::Audit(_) => ErrorKind::Unavailable,
        }
    }
}
