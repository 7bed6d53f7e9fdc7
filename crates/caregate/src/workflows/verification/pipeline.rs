//! Stage transitions for a single verification case.
//!
//! Every method here is a pure in-memory mutation of a [`VerificationCase`]. Persistence,
//! audit, and notifications are layered on by the service once a transition validates.

use chrono::{DateTime, Utc};

use super::blueprint::{PipelineDefinition, StageKind};
use super::domain::{
    CaseId, CaseOutcome, InterviewBooking, ReviewDecision, StageName, StageRecord,
    StageStatus, StageTransition, VerificationCase,
};
use super::repository::{InterviewSlot, SchedulingError};
use crate::audit::AuditError;
use crate::error::ErrorKind;
use crate::persistence::RepositoryError;

pub(crate) const MISSED_INTERVIEW_FEEDBACK: &str = "interview slot missed";

impl VerificationCase {
    /// New case on the first stage of `definition`, nothing submitted yet.
    pub fn open(
        id: CaseId,
        subject_id: impl Into<String>,
        definition: &PipelineDefinition,
        now: DateTime<Utc>,
    ) -> Result<Self, VerificationError> {
        if definition.stages().is_empty() {
            return Err(VerificationError::InvalidDefinition(
                "a case needs at least one stage".to_string(),
            ));
        }

        Ok(Self {
            id,
            subject_type: definition.subject_type(),
            subject_id: subject_id.into(),
            stages: definition
                .stages()
                .iter()
                .map(|stage| StageRecord::not_started(stage.name))
                .collect(),
            current_stage_index: 0,
            outcome: CaseOutcome::InProgress,
            opened_at: now,
        })
    }

    /// Attach applicant evidence to the current stage.
    pub fn submit_evidence(
        &mut self,
        definition: &PipelineDefinition,
        stage: StageName,
        evidence_refs: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<StageTransition, VerificationError> {
        let index = self.open_stage_index(stage)?;
        let stage_definition = definition.stage(stage).ok_or_else(|| {
            VerificationError::InvalidDefinition(format!(
                "stage {} is not part of the {} pipeline",
                stage.key(),
                definition.subject_type().label()
            ))
        })?;

        let record = &mut self.stages[index];
        if stage_definition.kind == StageKind::Interview
            || record.status != StageStatus::NotStarted
        {
            return Err(VerificationError::InvalidTransition {
                stage,
                status: record.status,
                action: "submit evidence",
            });
        }

        let evidence_refs: Vec<String> = evidence_refs
            .into_iter()
            .map(|reference| reference.trim().to_string())
            .filter(|reference| !reference.is_empty())
            .collect();
        if evidence_refs.len() < stage_definition.min_evidence {
            return Err(VerificationError::InsufficientEvidence {
                stage,
                required: stage_definition.min_evidence,
                provided: evidence_refs.len(),
            });
        }

        let from = record.status;
        record.evidence_refs = evidence_refs;

        if stage_definition.requires_human_review {
            record.status = StageStatus::PendingReview;
        } else {
            record.status = StageStatus::Approved;
            record.reviewer_id = None;
            record.decided_at = Some(now);
            record.expires_at = stage_definition.expiry.map(|expiry| now + expiry);
            self.advance();
        }

        Ok(StageTransition {
            stage,
            from,
            to: self.stages[index].status,
        })
    }

    /// Apply a reviewer verdict to the current stage.
    pub fn record_decision(
        &mut self,
        definition: &PipelineDefinition,
        reviewer_id: &str,
        decision: ReviewDecision,
        feedback: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<StageTransition, VerificationError> {
        let index = self.current_index()?;
        let record = &mut self.stages[index];
        let stage = record.name;

        if record.status != StageStatus::PendingReview {
            return Err(VerificationError::InvalidTransition {
                stage,
                status: record.status,
                action: "record a decision",
            });
        }

        let feedback = feedback
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        if decision.requires_feedback() && feedback.is_none() {
            return Err(VerificationError::FeedbackRequired { stage, decision });
        }

        let from = record.status;
        record.reviewer_id = Some(reviewer_id.to_string());
        record.decided_at = Some(now);
        record.feedback = feedback;

        match decision {
            ReviewDecision::Approve => {
                record.status = StageStatus::Approved;
                record.expires_at = definition
                    .stage(stage)
                    .and_then(|stage_definition| stage_definition.expiry)
                    .map(|expiry| now + expiry);
                self.advance();
            }
            ReviewDecision::Reject => {
                record.status = StageStatus::Rejected;
                self.outcome = CaseOutcome::Rejected;
            }
            ReviewDecision::SendBack => {
                record.status = StageStatus::NotStarted;
                record.interview = None;
                record.expires_at = None;
            }
        }

        Ok(StageTransition {
            stage,
            from,
            to: self.stages[index].status,
        })
    }

    /// Book `slot` for the interview stage the case is waiting on.
    pub fn schedule_interview(
        &mut self,
        definition: &PipelineDefinition,
        slot: &InterviewSlot,
        now: DateTime<Utc>,
    ) -> Result<StageTransition, VerificationError> {
        let index = self.current_index()?;
        let record = &mut self.stages[index];
        let is_interview = definition
            .stage(record.name)
            .is_some_and(|stage_definition| stage_definition.kind == StageKind::Interview);

        if !is_interview {
            return Err(VerificationError::StageMismatch {
                current: record.name,
                requested: StageName::Interview,
            });
        }
        if record.status != StageStatus::NotStarted {
            return Err(VerificationError::InvalidTransition {
                stage: record.name,
                status: record.status,
                action: "schedule an interview",
            });
        }
        if !slot.available || slot.starts_at <= now {
            return Err(VerificationError::SlotUnavailable {
                slot_id: slot.slot_id.clone(),
            });
        }

        record.status = StageStatus::Scheduled;
        record.interview = Some(InterviewBooking {
            slot_id: slot.slot_id.clone(),
            starts_at: slot.starts_at,
        });

        Ok(StageTransition {
            stage: record.name,
            from: StageStatus::NotStarted,
            to: StageStatus::Scheduled,
        })
    }

    /// The interview took place; hand the stage to a reviewer.
    pub fn complete_interview(&mut self) -> Result<StageTransition, VerificationError> {
        let index = self.current_index()?;
        let record = &mut self.stages[index];
        if record.status != StageStatus::Scheduled {
            return Err(VerificationError::InvalidTransition {
                stage: record.name,
                status: record.status,
                action: "complete an interview",
            });
        }

        record.status = StageStatus::PendingReview;
        Ok(StageTransition {
            stage: record.name,
            from: StageStatus::Scheduled,
            to: StageStatus::PendingReview,
        })
    }

    /// The booked slot passed without the interview happening; the applicant rebooks.
    pub fn release_missed_interview(&mut self) -> Result<StageTransition, VerificationError> {
        let index = self.current_index()?;
        let record = &mut self.stages[index];
        if record.status != StageStatus::Scheduled {
            return Err(VerificationError::InvalidTransition {
                stage: record.name,
                status: record.status,
                action: "release a missed interview",
            });
        }

        record.status = StageStatus::NotStarted;
        record.interview = None;
        record.feedback = Some(MISSED_INTERVIEW_FEEDBACK.to_string());
        Ok(StageTransition {
            stage: record.name,
            from: StageStatus::Scheduled,
            to: StageStatus::NotStarted,
        })
    }

    /// Downgrade approved stages whose evidence has lapsed and move the case back to the
    /// earliest of them. Returns one transition per expired stage.
    pub fn expire_stale_evidence(&mut self, now: DateTime<Utc>) -> Vec<StageTransition> {
        if self.outcome == CaseOutcome::Rejected {
            return Vec::new();
        }

        let mut expired = Vec::new();
        for record in &mut self.stages {
            let lapsed = record.status == StageStatus::Approved
                && record.expires_at.is_some_and(|expires_at| expires_at <= now);
            if !lapsed {
                continue;
            }

            let expired_on = record.expires_at.map(|at| at.date_naive());
            record.status = StageStatus::NotStarted;
            record.reviewer_id = None;
            record.decided_at = None;
            record.expires_at = None;
            record.evidence_refs.clear();
            record.feedback = expired_on.map(|date| format!("evidence expired on {date}"));
            expired.push(StageTransition {
                stage: record.name,
                from: StageStatus::Approved,
                to: StageStatus::NotStarted,
            });
        }

        let Some(earliest) = expired.first().map(|transition| transition.stage) else {
            return expired;
        };

        let earliest_index = self
            .stages
            .iter()
            .position(|record| record.name == earliest)
            .unwrap_or(0);
        for record in self.stages.iter_mut().skip(earliest_index + 1) {
            if matches!(
                record.status,
                StageStatus::Scheduled | StageStatus::PendingReview
            ) {
                expired.push(StageTransition {
                    stage: record.name,
                    from: record.status,
                    to: StageStatus::NotStarted,
                });
                record.status = StageStatus::NotStarted;
                record.interview = None;
            }
        }

        self.outcome = CaseOutcome::InProgress;
        self.advance();
        expired
    }

    /// Administrative reopen of a rejected case on the stage that rejected it.
    pub fn reopen(&mut self) -> Result<StageTransition, VerificationError> {
        if self.outcome != CaseOutcome::Rejected {
            return Err(VerificationError::NotReopenable {
                case_id: self.id.clone(),
                outcome: self.outcome,
            });
        }

        let record = self
            .stages
            .iter_mut()
            .find(|record| record.status == StageStatus::Rejected)
            .ok_or_else(|| VerificationError::NotReopenable {
                case_id: self.id.clone(),
                outcome: CaseOutcome::Rejected,
            })?;

        record.status = StageStatus::NotStarted;
        record.reviewer_id = None;
        record.decided_at = None;
        record.interview = None;
        let transition = StageTransition {
            stage: record.name,
            from: StageStatus::Rejected,
            to: StageStatus::NotStarted,
        };

        self.outcome = CaseOutcome::InProgress;
        self.advance();
        Ok(transition)
    }

    /// Point the case at the first stage that is not yet approved.
    fn advance(&mut self) {
        match self
            .stages
            .iter()
            .position(|record| record.status != StageStatus::Approved)
        {
            Some(index) => self.current_stage_index = index,
            None => {
                self.current_stage_index = self.stages.len();
                self.outcome = CaseOutcome::Approved;
            }
        }
    }

    fn current_index(&self) -> Result<usize, VerificationError> {
        if self.outcome != CaseOutcome::InProgress || self.current_stage().is_none() {
            return Err(VerificationError::CaseClosed {
                case_id: self.id.clone(),
                outcome: self.outcome,
            });
        }
        Ok(self.current_stage_index)
    }

    fn open_stage_index(&self, requested: StageName) -> Result<usize, VerificationError> {
        let index = self.current_index()?;
        let current = self.stages[index].name;
        if current != requested {
            return Err(VerificationError::StageMismatch { current, requested });
        }
        Ok(index)
    }
}

/// Failure of a verification operation. Nothing is persisted or audited when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("case is on stage {} not {}", current.key(), requested.key())]
    StageMismatch {
        current: StageName,
        requested: StageName,
    },
    #[error("case {case_id} is closed ({})", outcome.key())]
    CaseClosed {
        case_id: CaseId,
        outcome: CaseOutcome,
    },
    #[error("stage {} needs at least {required} evidence file(s), got {provided}", stage.key())]
    InsufficientEvidence {
        stage: StageName,
        required: usize,
        provided: usize,
    },
    #[error("{} on stage {} requires feedback for the applicant", decision.key(), stage.key())]
    FeedbackRequired {
        stage: StageName,
        decision: ReviewDecision,
    },
    #[error("cannot {action} while stage {} is {}", stage.key(), status.key())]
    InvalidTransition {
        stage: StageName,
        status: StageStatus,
        action: &'static str,
    },
    #[error("case {case_id} cannot be reopened while {}", outcome.key())]
    NotReopenable {
        case_id: CaseId,
        outcome: CaseOutcome,
    },
    #[error("interview slot {slot_id} is not available")]
    SlotUnavailable { slot_id: String },
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),
    #[error("case {case_id} was modified concurrently; reload and retry")]
    StaleState { case_id: CaseId },
    #[error("case {0} not found")]
    NotFound(CaseId),
    #[error("a non-empty reason is required")]
    InvalidReason,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
}

impl VerificationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StageMismatch { .. } => ErrorKind::StageMismatch,
            Self::CaseClosed { .. } => ErrorKind::CaseClosed,
            Self::InsufficientEvidence { .. } => ErrorKind::InsufficientEvidence,
            Self::FeedbackRequired { .. } => ErrorKind::FeedbackRequired,
            Self::InvalidTransition { .. } | Self::NotReopenable { .. } => {
                ErrorKind::InvalidTransition
            }
            Self::SlotUnavailable { .. } => ErrorKind::SlotUnavailable,
            Self::InvalidDefinition(_) => ErrorKind::InvalidDefinition,
            Self::StaleState { .. } => ErrorKind::StaleState,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidReason => ErrorKind::InvalidReason,
            Self::Repository(RepositoryError::VersionConflict { .. }) => ErrorKind::StaleState,
            Self::Repository(RepositoryError::NotFound) => ErrorKind::NotFound,
            Self::Repository(_) | Self::Audit(_) => ErrorKind::Unavailable,
            Self::Scheduling(SchedulingError::Unavailable(_)) => ErrorKind::Unavailable,
            Self::Scheduling(_) => ErrorKind::SlotUnavailable,
        }
    }
}
