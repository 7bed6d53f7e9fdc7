//! Multi-stage verification that gates caregivers and agencies from going live.
//!
//! Applicants submit evidence and book interviews, reviewers approve, reject, or send a
//! stage back, and the orchestrator handles interview outcomes and evidence expiry. Every
//! committed transition is versioned, audited, and followed by an applicant notification.

pub mod blueprint;
pub mod domain;
pub mod orchestrator;
pub mod pipeline;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use blueprint::{PipelineBlueprint, PipelineDefinition, StageDefinition, StageKind};
pub use domain::{
    CaseId, CaseOutcome, CaseView, InterviewBooking, ReviewDecision, StageName, StageRecord,
    StageStatus, StageTransition, StageView, SubjectType, VerificationCase,
};
pub use orchestrator::{VerificationOrchestrator, VerificationSweep};
pub use pipeline::VerificationError;
pub use repository::{
    newest_first, CaseFilter, CasePage, CaseRepository, InterviewScheduler, InterviewSlot,
    InterviewStatus, SchedulingError,
};
pub use router::verification_router;
pub use service::{CaseListing, Pagination, VerificationService};
