use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{CaseId, CaseOutcome, StageStatus, SubjectType, VerificationCase};
use crate::persistence::{RepositoryError, Versioned};

/// Storage abstraction for verification cases with optimistic concurrency.
pub trait CaseRepository: Send + Sync {
    /// Store a brand-new case at version 1.
    fn insert(
        &self,
        case: VerificationCase,
    ) -> Result<Versioned<VerificationCase>, RepositoryError>;

    fn fetch(&self, id: &CaseId) -> Result<Option<Versioned<VerificationCase>>, RepositoryError>;

    /// Replace the case if it is still at `expected_version`, returning the new version.
    fn save(&self, case: VerificationCase, expected_version: u64)
        -> Result<u64, RepositoryError>;

    /// Cases the orchestrator still has to watch (everything not rejected), in ascending id
    /// order starting strictly after `after`, at most `limit` of them.
    fn active(
        &self,
        after: Option<&CaseId>,
        limit: usize,
    ) -> Result<Vec<Versioned<VerificationCase>>, RepositoryError>;

    /// One page of the cases matching `filter`, newest first, plus the total match count.
    fn list(
        &self,
        filter: &CaseFilter,
        offset: usize,
        limit: usize,
    ) -> Result<CasePage, RepositoryError>;
}

/// Moderator queue filter. Unset fields match every case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaseFilter {
    pub subject_type: Option<SubjectType>,
    /// Compared against the stage the case currently sits on; fully approved cases have none.
    pub stage_status: Option<StageStatus>,
    pub outcome: Option<CaseOutcome>,
}

impl CaseFilter {
    pub fn matches(&self, case: &VerificationCase) -> bool {
        self.subject_type
            .map_or(true, |subject_type| case.subject_type == subject_type)
            && self.outcome.map_or(true, |outcome| case.outcome == outcome)
            && self.stage_status.map_or(true, |status| {
                case.current_stage()
                    .is_some_and(|stage| stage.status == status)
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CasePage {
    pub cases: Vec<Versioned<VerificationCase>>,
    pub total: usize,
}

/// Order used by the moderator queue: most recently opened first, ties broken by id.
pub fn newest_first(
    left: &Versioned<VerificationCase>,
    right: &Versioned<VerificationCase>,
) -> std::cmp::Ordering {
    right
        .value
        .opened_at
        .cmp(&left.value.opened_at)
        .then_with(|| right.value.id.cmp(&left.value.id))
}

/// Bookable interview slot as reported by the scheduling collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterviewSlot {
    pub slot_id: String,
    pub starts_at: DateTime<Utc>,
    pub available: bool,
}

/// What the scheduling collaborator knows about a booked interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Pending,
    Occurred,
    Missed,
}

/// Interview calendar owned outside the engine.
pub trait InterviewScheduler: Send + Sync {
    fn slot(&self, slot_id: &str) -> Result<Option<InterviewSlot>, SchedulingError>;
    fn reserve(&self, slot_id: &str, case_id: &CaseId) -> Result<(), SchedulingError>;
    fn release(&self, slot_id: &str) -> Result<(), SchedulingError>;
    fn interview_status(&self, slot_id: &str) -> Result<InterviewStatus, SchedulingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("interview slot {0} does not exist")]
    UnknownSlot(String),
    #[error("interview slot {0} is already taken")]
    SlotTaken(String),
    #[error("scheduling service unavailable: {0}")]
    Unavailable(String),
}
