use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::access::{AccountRole, Capability};

/// Identifier wrapper for billing accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Escalation level of an overdue account, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LockState {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "reminder_3")]
    Reminder3,
    #[serde(rename = "reminder_5")]
    Reminder5,
    #[serde(rename = "final_warning_6")]
    FinalWarning6,
    #[serde(rename = "locked")]
    Locked,
}

impl LockState {
    pub const fn ordered() -> [Self; 5] {
        [
            Self::Current,
            Self::Reminder3,
            Self::Reminder5,
            Self::FinalWarning6,
            Self::Locked,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Reminder3 => "reminder_3",
            Self::Reminder5 => "reminder_5",
            Self::FinalWarning6 => "final_warning_6",
            Self::Locked => "locked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|state| state.label().eq_ignore_ascii_case(value.trim()))
    }

    /// Bucket for a number of days past the due date.
    pub const fn for_days_overdue(days: i64) -> Self {
        match days {
            i64::MIN..=2 => Self::Current,
            3..=4 => Self::Reminder3,
            5 => Self::Reminder5,
            6 => Self::FinalWarning6,
            _ => Self::Locked,
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Billing-cycle state for one marketplace account.
///
/// `lock_state` only moves forward while an invoice is outstanding; settlement and manual
/// unlock are the two ways back to `Current`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAccount {
    pub id: AccountId,
    pub owner_id: String,
    pub role: AccountRole,
    pub outstanding_invoice_id: Option<String>,
    /// Minor currency units.
    pub amount_due: u64,
    pub due_date: Option<NaiveDate>,
    pub lock_state: LockState,
    /// Escalation is suspended until this date after a manual unlock.
    pub grace_until: Option<NaiveDate>,
    pub opened_at: DateTime<Utc>,
}

impl BillingAccount {
    pub fn new(
        id: AccountId,
        owner_id: impl Into<String>,
        role: AccountRole,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            role,
            outstanding_invoice_id: None,
            amount_due: 0,
            due_date: None,
            lock_state: LockState::Current,
            grace_until: None,
            opened_at: now,
        }
    }

    pub fn days_overdue(&self, today: NaiveDate) -> i64 {
        match (&self.outstanding_invoice_id, self.due_date) {
            (Some(_), Some(due_date)) => (today - due_date).num_days().max(0),
            _ => 0,
        }
    }

    pub fn in_grace(&self, today: NaiveDate) -> bool {
        self.grace_until.is_some_and(|until| today < until)
    }

    pub fn status_view(
        &self,
        version: u64,
        today: NaiveDate,
        allowed: Vec<Capability>,
        restricted: Vec<Capability>,
    ) -> AccountView {
        AccountView {
            account_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            role: self.role,
            lock_state: self.lock_state,
            outstanding_invoice_id: self.outstanding_invoice_id.clone(),
            amount_due: self.amount_due,
            due_date: self.due_date,
            days_overdue: self.days_overdue(today),
            grace_until: self.grace_until,
            allowed_capabilities: allowed,
            restricted_capabilities: restricted,
            version,
        }
    }
}

/// Account state as rendered by the billing screens and restriction banner.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub account_id: AccountId,
    pub owner_id: String,
    pub role: AccountRole,
    pub lock_state: LockState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_invoice_id: Option<String>,
    pub amount_due: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub days_overdue: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_until: Option<NaiveDate>,
    pub allowed_capabilities: Vec<Capability>,
    pub restricted_capabilities: Vec<Capability>,
    pub version: u64,
}

/// Upward move produced by one escalation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockTransition {
    pub from: LockState,
    pub to: LockState,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Failed,
}

/// Payment-gateway webhook payload after signature checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub account_id: AccountId,
    pub payment_ref: String,
    pub amount: u64,
    pub status: PaymentStatus,
}
