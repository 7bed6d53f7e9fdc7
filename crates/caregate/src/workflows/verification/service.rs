use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::blueprint::{PipelineBlueprint, PipelineDefinition};
use super::domain::{
    CaseId, CaseOutcome, CaseView, ReviewDecision, StageName, StageStatus, SubjectType,
    VerificationCase,
};
use super::pipeline::VerificationError;
use super::repository::{CaseFilter, CaseRepository, InterviewScheduler};
use crate::audit::{Actor, AuditAction, AuditLogEntry, AuditTrail, EntityKind};
use crate::clock::Clock;
use crate::config::VerificationConfig;
use crate::notify::{templates, Notification, NotificationDispatcher};
use crate::persistence::{RepositoryError, Versioned};

/// Service wiring the pipeline rules to storage, scheduling, audit, and notifications.
pub struct VerificationService<R, S> {
    repository: Arc<R>,
    scheduler: Arc<S>,
    audit: Arc<dyn AuditTrail>,
    notifications: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    blueprint: PipelineBlueprint,
}

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of the moderator queue.
#[derive(Debug, Clone, Serialize)]
pub struct CaseListing {
    pub data: Vec<CaseView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

static CASE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_case_id() -> CaseId {
    let id = CASE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    CaseId(format!("case-{id:06}"))
}

/// Result of applying one transition in memory, before it is committed.
struct Change {
    action: AuditAction,
    reason: Option<String>,
    notification: Option<Notification>,
}

impl Change {
    fn new(action: AuditAction) -> Self {
        Self {
            action,
            reason: None,
            notification: None,
        }
    }

    fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    fn notify(mut self, notification: Notification) -> Self {
        self.notification = Some(notification);
        self
    }
}

impl<R, S> VerificationService<R, S>
where
    R: CaseRepository + 'static,
    S: InterviewScheduler + 'static,
{
    pub fn new(
        repository: Arc<R>,
        scheduler: Arc<S>,
        audit: Arc<dyn AuditTrail>,
        notifications: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        config: &VerificationConfig,
    ) -> Self {
        Self {
            repository,
            scheduler,
            audit,
            notifications,
            clock,
            blueprint: PipelineBlueprint::standard(config),
        }
    }

    /// Swap the stage sequences, e.g. to run a pipeline with auto-approved stages.
    pub fn with_blueprint(mut self, blueprint: PipelineBlueprint) -> Self {
        self.blueprint = blueprint;
        self
    }

    pub fn scheduler(&self) -> &S {
        self.scheduler.as_ref()
    }

    pub fn notifications(&self) -> &NotificationDispatcher {
        self.notifications.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a case for a freshly registered caregiver or agency.
    pub fn open_case(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        let now = self.clock.now();
        let case = VerificationCase::open(
            next_case_id(),
            subject_id,
            self.blueprint.for_subject(subject_type),
            now,
        )?;

        let after = case.state_label();
        let stored = self.repository.insert(case)?;
        let case_id = stored.value.id.clone();

        self.append_audit(
            AuditLogEntry::new(
                &Actor::applicant(subject_id),
                AuditAction::CaseOpened,
                EntityKind::VerificationCase,
                case_id.0.clone(),
                now,
            )
            .states("", after),
        );

        info!(
            case_id = %case_id,
            subject_type = subject_type.label(),
            subject_id,
            "verification case opened"
        );
        record_transition_metric(AuditAction::CaseOpened);

        Ok(stored)
    }

    pub fn submit_evidence(
        &self,
        case_id: &CaseId,
        stage: StageName,
        evidence_refs: Vec<String>,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        self.commit_as(case_id, ActorSource::Subject, |case, definition, now| {
            let transition = case.submit_evidence(definition, stage, evidence_refs, now)?;
            let change = if transition.to == StageStatus::Approved {
                Change::new(AuditAction::StageAutoApproved)
                    .notify(approval_notice(case, stage))
            } else {
                Change::new(AuditAction::EvidenceSubmitted)
            };
            Ok(Some(change))
        })
    }

    pub fn record_decision(
        &self,
        case_id: &CaseId,
        reviewer_id: &str,
        decision: ReviewDecision,
        feedback: Option<String>,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        let actor = Actor::reviewer(reviewer_id);
        self.commit_as(
            case_id,
            ActorSource::Fixed(actor),
            |case, definition, now| {
                let transition =
                    case.record_decision(definition, reviewer_id, decision, feedback, now)?;
                let feedback = case
                    .stage(transition.stage)
                    .and_then(|stage| stage.feedback.clone());

                let change = match decision {
                    ReviewDecision::Approve => Change::new(AuditAction::StageApproved)
                        .notify(approval_notice(case, transition.stage)),
                    ReviewDecision::Reject => Change::new(AuditAction::StageRejected).notify(
                        Notification::new(&case.subject_id, templates::CASE_REJECTED)
                            .param("case_id", &case.id)
                            .param("stage", transition.stage.label())
                            .param("feedback", feedback.as_deref().unwrap_or_default()),
                    ),
                    ReviewDecision::SendBack => Change::new(AuditAction::StageSentBack).notify(
                        Notification::new(&case.subject_id, templates::STAGE_SENT_BACK)
                            .param("case_id", &case.id)
                            .param("stage", transition.stage.label())
                            .param("feedback", feedback.as_deref().unwrap_or_default()),
                    ),
                };
                Ok(Some(change.reason(feedback)))
            },
        )
    }

    /// Book an interview slot. The slot is read and reserved outside the case write; a lost
    /// write releases the reservation again.
    pub fn schedule_interview(
        &self,
        case_id: &CaseId,
        slot_id: &str,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        let slot = self
            .scheduler
            .slot(slot_id)?
            .ok_or_else(|| VerificationError::SlotUnavailable {
                slot_id: slot_id.to_string(),
            })?;

        let mut reserved = false;
        let result = self.commit_as(case_id, ActorSource::Subject, |case, definition, now| {
            case.schedule_interview(definition, &slot, now)?;
            self.scheduler.reserve(&slot.slot_id, &case.id)?;
            reserved = true;
            Ok(Some(
                Change::new(AuditAction::InterviewScheduled).notify(
                    Notification::new(&case.subject_id, templates::INTERVIEW_SCHEDULED)
                        .param("case_id", &case.id)
                        .param("slot_id", &slot.slot_id)
                        .param("starts_at", slot.starts_at.to_rfc3339()),
                ),
            ))
        });

        if result.is_err() && reserved {
            if let Err(err) = self.scheduler.release(&slot.slot_id) {
                warn!(
                    case_id = %case_id,
                    slot_id = %slot.slot_id,
                    error = %err,
                    "failed to release interview slot after aborted booking"
                );
            }
        }

        result
    }

    /// Interview-occurred event from the scheduling collaborator.
    pub fn complete_interview(
        &self,
        case_id: &CaseId,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        self.commit_as(
            case_id,
            ActorSource::Fixed(Actor::system()),
            |case, _, _| {
                case.complete_interview()?;
                Ok(Some(Change::new(AuditAction::InterviewCompleted)))
            },
        )
    }

    pub fn release_missed_interview(
        &self,
        case_id: &CaseId,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        self.commit_as(
            case_id,
            ActorSource::Fixed(Actor::system()),
            |case, _, _| {
                let slot_id = case
                    .current_stage()
                    .and_then(|stage| stage.interview.as_ref())
                    .map(|booking| booking.slot_id.clone())
                    .unwrap_or_default();
                let transition = case.release_missed_interview()?;
                Ok(Some(
                    Change::new(AuditAction::InterviewMissed)
                        .reason(Some(format!("slot {slot_id} passed without an interview")))
                        .notify(
                            Notification::new(&case.subject_id, templates::INTERVIEW_MISSED)
                                .param("case_id", &case.id)
                                .param("stage", transition.stage.label())
                                .param("slot_id", slot_id),
                        ),
                ))
            },
        )
    }

    /// Downgrade lapsed approvals. Returns `None` when nothing had expired.
    pub fn expire_stale_evidence(
        &self,
        case_id: &CaseId,
    ) -> Result<Option<Versioned<VerificationCase>>, VerificationError> {
        let mut changed = false;
        let result = self.commit_as(
            case_id,
            ActorSource::Fixed(Actor::system()),
            |case, _, now| {
                let transitions = case.expire_stale_evidence(now);
                let expired: Vec<&'static str> = transitions
                    .iter()
                    .filter(|transition| transition.from == StageStatus::Approved)
                    .map(|transition| transition.stage.key())
                    .collect();
                if expired.is_empty() {
                    return Ok(None);
                }

                changed = true;
                Ok(Some(
                    Change::new(AuditAction::SystemExpired)
                        .reason(Some(format!("evidence expired: {}", expired.join(", "))))
                        .notify(
                            Notification::new(&case.subject_id, templates::EVIDENCE_EXPIRED)
                                .param("case_id", &case.id)
                                .param("stages", expired.join(",")),
                        ),
                ))
            },
        )?;

        Ok(changed.then_some(result))
    }

    /// Administrative reopen of a rejected case. The reason is mandatory.
    pub fn reopen_case(
        &self,
        case_id: &CaseId,
        admin_id: &str,
        reason: &str,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VerificationError::InvalidReason);
        }

        self.commit_as(
            case_id,
            ActorSource::Fixed(Actor::administrator(admin_id)),
            |case, _, _| {
                let transition = case.reopen()?;
                Ok(Some(
                    Change::new(AuditAction::CaseReopened)
                        .reason(Some(reason.to_string()))
                        .notify(
                            Notification::new(&case.subject_id, templates::CASE_REOPENED)
                                .param("case_id", &case.id)
                                .param("stage", transition.stage.label()),
                        ),
                ))
            },
        )
    }

    pub fn get_case(
        &self,
        case_id: &CaseId,
    ) -> Result<Versioned<VerificationCase>, VerificationError> {
        self.repository
            .fetch(case_id)?
            .ok_or_else(|| VerificationError::NotFound(case_id.clone()))
    }

    /// Audit entries for one case in the order they were written.
    pub fn case_history(&self, case_id: &CaseId) -> Result<Vec<AuditLogEntry>, VerificationError> {
        self.get_case(case_id)?;
        Ok(self
            .audit
            .entries_for(EntityKind::VerificationCase, &case_id.0)?)
    }

    pub fn active_cases(
        &self,
        after: Option<&CaseId>,
        limit: usize,
    ) -> Result<Vec<Versioned<VerificationCase>>, VerificationError> {
        Ok(self.repository.active(after, limit)?)
    }

    /// Moderator queue. `page` counts from 1; `limit` is clamped to `1..=MAX_PAGE_SIZE`.
    pub fn list_cases(
        &self,
        filter: &CaseFilter,
        page: usize,
        limit: usize,
    ) -> Result<CaseListing, VerificationError> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let found = self.repository.list(filter, (page - 1) * limit, limit)?;

        let total_pages = found.total.div_ceil(limit);
        Ok(CaseListing {
            data: found
                .cases
                .into_iter()
                .map(|stored| stored.value.status_view(stored.version))
                .collect(),
            pagination: Pagination {
                page,
                limit,
                total: found.total,
                total_pages,
                has_next_page: page < total_pages,
                has_previous_page: page > 1,
            },
        })
    }

    /// Load, mutate, and save one case under its version, then audit and notify.
    ///
    /// `apply` returning `Ok(None)` means nothing changed and nothing is written.
    fn commit_as<F>(
        &self,
        case_id: &CaseId,
        source: ActorSource,
        apply: F,
    ) -> Result<Versioned<VerificationCase>, VerificationError>
    where
        F: FnOnce(
            &mut VerificationCase,
            &PipelineDefinition,
            DateTime<Utc>,
        ) -> Result<Option<Change>, VerificationError>,
    {
        let now = self.clock.now();
        let Versioned {
            version,
            value: mut case,
        } = self.get_case(case_id)?;

        let before = case.state_label();
        let held = booked_slots(&case);
        let definition = self.blueprint.for_subject(case.subject_type);
        let Some(change) = apply(&mut case, definition, now)? else {
            return Ok(Versioned::new(version, case));
        };
        let after = case.state_label();
        let still_booked = booked_slots(&case);

        let version = self
            .repository
            .save(case.clone(), version)
            .map_err(|err| match err {
                RepositoryError::VersionConflict { .. } => VerificationError::StaleState {
                    case_id: case_id.clone(),
                },
                other => VerificationError::Repository(other),
            })?;

        let actor = match source {
            ActorSource::Subject => Actor::applicant(&case.subject_id),
            ActorSource::Fixed(actor) => actor,
        };
        self.append_audit(
            AuditLogEntry::new(
                &actor,
                change.action,
                EntityKind::VerificationCase,
                case_id.0.clone(),
                now,
            )
            .states(before.clone(), after.clone())
            .reason(change.reason),
        );

        info!(
            case_id = %case_id,
            action = change.action.label(),
            actor_id = %actor.id,
            before = %before,
            after = %after,
            version,
            "verification case transitioned"
        );
        record_transition_metric(change.action);

        for slot_id in held.iter().filter(|slot_id| !still_booked.contains(slot_id)) {
            self.release_slot(case_id, slot_id);
        }

        if let Some(notification) = change.notification {
            self.notifications.dispatch(notification, now);
        }

        Ok(Versioned::new(version, case))
    }

    /// Hand a slot the case no longer holds back to the calendar. The case write already
    /// happened, so a failure here is logged rather than returned.
    fn release_slot(&self, case_id: &CaseId, slot_id: &str) {
        match self.scheduler.release(slot_id) {
            Ok(()) => debug!(case_id = %case_id, slot_id, "interview slot released"),
            Err(err) => warn!(
                case_id = %case_id,
                slot_id,
                error = %err,
                "failed to release interview slot"
            ),
        }
    }

    fn append_audit(&self, entry: AuditLogEntry) {
        if let Err(err) = self.audit.append(entry.clone()) {
            error!(
                entity_id = %entry.entity_id,
                action = entry.action.label(),
                error = %err,
                "audit append failed for committed transition"
            );
        }
    }
}

fn booked_slots(case: &VerificationCase) -> Vec<String> {
    case.stages
        .iter()
        .filter_map(|stage| stage.interview.as_ref())
        .map(|booking| booking.slot_id.clone())
        .collect()
}

fn record_transition_metric(action: AuditAction) {
    metrics::counter!("caregate_stage_transitions_total", "action" => action.label()).increment(1);
}

enum ActorSource {
    Subject,
    Fixed(Actor),
}

fn approval_notice(case: &VerificationCase, stage: StageName) -> Notification {
    if case.outcome == CaseOutcome::Approved {
        Notification::new(&case.subject_id, templates::CASE_APPROVED).param("case_id", &case.id)
    } else {
        let next = case
            .current_stage()
            .map(|record| record.name.label())
            .unwrap_or_default();
        Notification::new(&case.subject_id, templates::STAGE_APPROVED)
            .param("case_id", &case.id)
            .param("stage", stage.label())
            .param("next_stage", next)
    }
}
