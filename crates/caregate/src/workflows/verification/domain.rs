use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for verification cases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub String);

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is being verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Caregiver,
    Agency,
}

impl SubjectType {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Caregiver => "caregiver",
            Self::Agency => "agency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Certificates,
    PoliceClearance,
    Interview,
    PsychTest,
    DocumentCheck,
    LegalDocuments,
    PhysicalVerification,
    FinalApproval,
}

impl StageName {
    pub const fn key(self) -> &'static str {
        match self {
            Self::Certificates => "certificates",
            Self::PoliceClearance => "police_clearance",
            Self::Interview => "interview",
            Self::PsychTest => "psych_test",
            Self::DocumentCheck => "document_check",
            Self::LegalDocuments => "legal_documents",
            Self::PhysicalVerification => "physical_verification",
            Self::FinalApproval => "final_approval",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Certificates => "Certificates Review",
            Self::PoliceClearance => "Police Clearance",
            Self::Interview => "Interview",
            Self::PsychTest => "Psychological Assessment",
            Self::DocumentCheck => "Document Check",
            Self::LegalDocuments => "Legal Documents",
            Self::PhysicalVerification => "Physical Verification",
            Self::FinalApproval => "Final Approval",
        }
    }
}

/// Per-stage status. `Scheduled` only ever appears on interview stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    NotStarted,
    Scheduled,
    PendingReview,
    Approved,
    Rejected,
}

impl StageStatus {
    pub const fn key(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Scheduled => "scheduled",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::Scheduled => "Interview Scheduled",
            Self::PendingReview => "Pending Review",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    InProgress,
    Approved,
    Rejected,
}

impl CaseOutcome {
    pub const fn key(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Reviewer verdict on a stage that is pending review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    SendBack,
}

impl ReviewDecision {
    pub const fn key(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::SendBack => "send_back",
        }
    }

    pub const fn requires_feedback(self) -> bool {
        matches!(self, Self::Reject | Self::SendBack)
    }
}

/// Interview slot booked for a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewBooking {
    pub slot_id: String,
    pub starts_at: DateTime<Utc>,
}

/// Progress of one stage inside a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: StageName,
    pub status: StageStatus,
    pub reviewer_id: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub feedback: Option<String>,
    pub evidence_refs: Vec<String>,
    pub interview: Option<InterviewBooking>,
    /// Set on approval for stages whose evidence lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

impl StageRecord {
    pub fn not_started(name: StageName) -> Self {
        Self {
            name,
            status: StageStatus::NotStarted,
            reviewer_id: None,
            decided_at: None,
            feedback: None,
            evidence_refs: Vec::new(),
            interview: None,
            expires_at: None,
        }
    }
}

/// Full verification record for one caregiver or agency applicant.
///
/// Only the pipeline operations mutate a case; the subject contributes evidence, never
/// statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCase {
    pub id: CaseId,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub stages: Vec<StageRecord>,
    pub current_stage_index: usize,
    pub outcome: CaseOutcome,
    pub opened_at: DateTime<Utc>,
}

impl VerificationCase {
    /// Stage the case is waiting on, `None` once every stage is approved.
    pub fn current_stage(&self) -> Option<&StageRecord> {
        self.stages.get(self.current_stage_index)
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Compact label used for audit before/after snapshots.
    pub fn state_label(&self) -> String {
        match self.current_stage() {
            Some(stage) => format!(
                "{}:{}/{}",
                stage.name.key(),
                stage.status.key(),
                self.outcome.key()
            ),
            None => format!("complete/{}", self.outcome.key()),
        }
    }

    pub fn status_view(&self, version: u64) -> CaseView {
        CaseView {
            case_id: self.id.clone(),
            subject_type: self.subject_type,
            subject_id: self.subject_id.clone(),
            outcome: self.outcome,
            current_stage: self.current_stage().map(|stage| stage.name),
            current_stage_index: self.current_stage_index,
            version,
            stages: self
                .stages
                .iter()
                .map(|stage| StageView {
                    name: stage.name,
                    label: stage.name.label(),
                    status: stage.status,
                    status_label: stage.status.label(),
                    reviewer_id: stage.reviewer_id.clone(),
                    decided_at: stage.decided_at,
                    feedback: stage.feedback.clone(),
                    evidence_refs: stage.evidence_refs.clone(),
                    interview: stage.interview.clone(),
                    expires_at: stage.expires_at,
                })
                .collect(),
        }
    }
}

/// Sanitized representation of a case for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct CaseView {
    pub case_id: CaseId,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub outcome: CaseOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageName>,
    pub current_stage_index: usize,
    pub version: u64,
    pub stages: Vec<StageView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageView {
    pub name: StageName,
    pub label: &'static str,
    pub status: StageStatus,
    pub status_label: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub evidence_refs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview: Option<InterviewBooking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Status change produced by one pipeline operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransition {
    pub stage: StageName,
    pub from: StageStatus,
    pub to: StageStatus,
}
