//! Append-only record of every state transition performed by the engines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of whoever caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Applicant,
    Reviewer,
    Administrator,
    PaymentGateway,
    System,
}

impl ActorRole {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::Reviewer => "reviewer",
            Self::Administrator => "administrator",
            Self::PaymentGateway => "payment_gateway",
            Self::System => "system",
        }
    }
}

/// Identity attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "system";

    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ID, ActorRole::System)
    }

    pub fn applicant(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Applicant)
    }

    pub fn reviewer(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Reviewer)
    }

    pub fn administrator(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Administrator)
    }

    pub fn payment_gateway(payment_ref: impl Into<String>) -> Self {
        Self::new(payment_ref, ActorRole::PaymentGateway)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CaseOpened,
    EvidenceSubmitted,
    StageAutoApproved,
    StageApproved,
    StageRejected,
    StageSentBack,
    InterviewScheduled,
    InterviewCompleted,
    InterviewMissed,
    SystemExpired,
    CaseReopened,
    AccountOpened,
    InvoiceIssued,
    LockEscalated,
    PaymentSettled,
    ManualUnlock,
    AttemptedUnlockDenied,
}

impl AuditAction {
    pub const fn label(self) -> &'static str {
        match self {
            Self::CaseOpened => "case_opened",
            Self::EvidenceSubmitted => "evidence_submitted",
            Self::StageAutoApproved => "stage_auto_approved",
            Self::StageApproved => "stage_approved",
            Self::StageRejected => "stage_rejected",
            Self::StageSentBack => "stage_sent_back",
            Self::InterviewScheduled => "interview_scheduled",
            Self::InterviewCompleted => "interview_completed",
            Self::InterviewMissed => "interview_missed",
            Self::SystemExpired => "system_expired",
            Self::CaseReopened => "case_reopened",
            Self::AccountOpened => "account_opened",
            Self::InvoiceIssued => "invoice_issued",
            Self::LockEscalated => "lock_escalated",
            Self::PaymentSettled => "payment_settled",
            Self::ManualUnlock => "manual_unlock",
            Self::AttemptedUnlockDenied => "attempted_unlock_denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    VerificationCase,
    BillingAccount,
}

/// Immutable audit record. `before_state`/`after_state` are compact labels of the entity
/// state (e.g. `police_clearance:pending_review/in_progress`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub actor_id: String,
    pub actor_role: ActorRole,
    pub action: AuditAction,
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub before_state: String,
    pub after_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditLogEntry {
    pub fn new(
        actor: &Actor,
        action: AuditAction,
        entity_type: EntityKind,
        entity_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            action,
            entity_type,
            entity_id: entity_id.into(),
            timestamp,
            before_state: String::new(),
            after_state: String::new(),
            reason: None,
        }
    }

    pub fn states(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before_state = before.into();
        self.after_state = after.into();
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

/// Append-only audit sink. Implementations must never rewrite or drop prior entries.
pub trait AuditTrail: Send + Sync {
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError>;

    /// Entries for one entity in append order.
    fn entries_for(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, AuditError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}
