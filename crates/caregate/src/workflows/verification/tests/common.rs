use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::{Clock, FixedClock};
use crate::config::VerificationConfig;
use crate::persistence::{RepositoryError, Versioned};
use crate::workflows::test_support::{
    dispatcher, fixed_clock, start_time, MemoryAudit, RecordingNotifier,
};
use crate::workflows::verification::{
    newest_first, CaseFilter, CaseId, CaseOutcome, CasePage, CaseRepository, InterviewScheduler,
    InterviewSlot, InterviewStatus, ReviewDecision, SchedulingError, StageName, SubjectType,
    VerificationCase, VerificationService,
};

#[derive(Default)]
pub(super) struct MemoryCaseRepository {
    cases: Mutex<HashMap<CaseId, Versioned<VerificationCase>>>,
}

impl CaseRepository for MemoryCaseRepository {
    fn insert(
        &self,
        case: VerificationCase,
    ) -> Result<Versioned<VerificationCase>, RepositoryError> {
        let mut guard = self.cases.lock().expect("repository mutex poisoned");
        if guard.contains_key(&case.id) {
            return Err(RepositoryError::Conflict);
        }
        let stored = Versioned::new(1, case);
        guard.insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn fetch(&self, id: &CaseId) -> Result<Option<Versioned<VerificationCase>>, RepositoryError> {
        let guard = self.cases.lock().expect("repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn save(
        &self,
        case: VerificationCase,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut guard = self.cases.lock().expect("repository mutex poisoned");
        let current = guard.get(&case.id).ok_or(RepositoryError::NotFound)?;
        if current.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found: current.version,
            });
        }
        let version = expected_version + 1;
        guard.insert(case.id.clone(), Versioned::new(version, case));
        Ok(version)
    }

    fn active(
        &self,
        after: Option<&CaseId>,
        limit: usize,
    ) -> Result<Vec<Versioned<VerificationCase>>, RepositoryError> {
        let guard = self.cases.lock().expect("repository mutex poisoned");
        let mut active: Vec<_> = guard
            .values()
            .filter(|stored| stored.value.outcome != CaseOutcome::Rejected)
            .filter(|stored| !after.is_some_and(|after| stored.value.id <= *after))
            .cloned()
            .collect();
        active.sort_by(|left, right| left.value.id.cmp(&right.value.id));
        active.truncate(limit);
        Ok(active)
    }

    fn list(
        &self,
        filter: &CaseFilter,
        offset: usize,
        limit: usize,
    ) -> Result<CasePage, RepositoryError> {
        let guard = self.cases.lock().expect("repository mutex poisoned");
        let mut matching: Vec<_> = guard
            .values()
            .filter(|stored| filter.matches(&stored.value))
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        Ok(CasePage {
            total: matching.len(),
            cases: matching.into_iter().skip(offset).take(limit).collect(),
        })
    }
}

/// Repository whose reads rendezvous on a barrier so two writers load the same version.
pub(super) struct RacingCaseRepository {
    inner: MemoryCaseRepository,
    barrier: Barrier,
    armed: AtomicBool,
}

impl RacingCaseRepository {
    pub(super) fn new(parties: usize) -> Self {
        Self {
            inner: MemoryCaseRepository::default(),
            barrier: Barrier::new(parties),
            armed: AtomicBool::new(false),
        }
    }

    pub(super) fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub(super) fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

impl CaseRepository for RacingCaseRepository {
    fn insert(
        &self,
        case: VerificationCase,
    ) -> Result<Versioned<VerificationCase>, RepositoryError> {
        self.inner.insert(case)
    }

    fn fetch(&self, id: &CaseId) -> Result<Option<Versioned<VerificationCase>>, RepositoryError> {
        let fetched = self.inner.fetch(id);
        if self.armed.load(Ordering::SeqCst) {
            self.barrier.wait();
        }
        fetched
    }

    fn save(
        &self,
        case: VerificationCase,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        self.inner.save(case, expected_version)
    }

    fn active(
        &self,
        after: Option<&CaseId>,
        limit: usize,
    ) -> Result<Vec<Versioned<VerificationCase>>, RepositoryError> {
        self.inner.active(after, limit)
    }

    fn list(
        &self,
        filter: &CaseFilter,
        offset: usize,
        limit: usize,
    ) -> Result<CasePage, RepositoryError> {
        self.inner.list(filter, offset, limit)
    }
}

#[derive(Default)]
pub(super) struct MemoryScheduler {
    slots: Mutex<HashMap<String, InterviewSlot>>,
    statuses: Mutex<HashMap<String, InterviewStatus>>,
    reservations: Mutex<HashMap<String, CaseId>>,
}

impl MemoryScheduler {
    pub(super) fn add_slot(&self, slot_id: &str, starts_at: DateTime<Utc>) {
        self.slots.lock().expect("slot mutex poisoned").insert(
            slot_id.to_string(),
            InterviewSlot {
                slot_id: slot_id.to_string(),
                starts_at,
                available: true,
            },
        );
    }

    pub(super) fn set_status(&self, slot_id: &str, status: InterviewStatus) {
        self.statuses
            .lock()
            .expect("status mutex poisoned")
            .insert(slot_id.to_string(), status);
    }

    pub(super) fn reserved_by(&self, slot_id: &str) -> Option<CaseId> {
        self.reservations
            .lock()
            .expect("reservation mutex poisoned")
            .get(slot_id)
            .cloned()
    }
}

impl InterviewScheduler for MemoryScheduler {
    fn slot(&self, slot_id: &str) -> Result<Option<InterviewSlot>, SchedulingError> {
        let slots = self.slots.lock().expect("slot mutex poisoned");
        let reserved = self.reserved_by(slot_id).is_some();
        Ok(slots.get(slot_id).cloned().map(|mut slot| {
            slot.available = slot.available && !reserved;
            slot
        }))
    }

    fn reserve(&self, slot_id: &str, case_id: &CaseId) -> Result<(), SchedulingError> {
        let mut reservations = self.reservations.lock().expect("reservation mutex poisoned");
        if reservations.contains_key(slot_id) {
            return Err(SchedulingError::SlotTaken(slot_id.to_string()));
        }
        reservations.insert(slot_id.to_string(), case_id.clone());
        Ok(())
    }

    fn release(&self, slot_id: &str) -> Result<(), SchedulingError> {
        self.reservations
            .lock()
            .expect("reservation mutex poisoned")
            .remove(slot_id);
        Ok(())
    }

    fn interview_status(&self, slot_id: &str) -> Result<InterviewStatus, SchedulingError> {
        Ok(self
            .statuses
            .lock()
            .expect("status mutex poisoned")
            .get(slot_id)
            .copied()
            .unwrap_or(InterviewStatus::Pending))
    }
}

pub(super) struct Harness<R> {
    pub(super) service: Arc<VerificationService<R, MemoryScheduler>>,
    pub(super) repository: Arc<R>,
    pub(super) scheduler: Arc<MemoryScheduler>,
    pub(super) audit: Arc<MemoryAudit>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn harness() -> Harness<MemoryCaseRepository> {
    harness_with(Arc::new(MemoryCaseRepository::default()))
}

pub(super) fn harness_with<R: CaseRepository + 'static>(repository: Arc<R>) -> Harness<R> {
    let scheduler = Arc::new(MemoryScheduler::default());
    let audit = Arc::new(MemoryAudit::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = fixed_clock();
    let service = Arc::new(VerificationService::new(
        repository.clone(),
        scheduler.clone(),
        audit.clone(),
        dispatcher(notifier.clone()),
        clock.clone(),
        &VerificationConfig::default(),
    ));

    Harness {
        service,
        repository,
        scheduler,
        audit,
        notifier,
        clock,
    }
}

pub(super) fn evidence(name: &str) -> Vec<String> {
    vec![format!("s3://caregate/evidence/{name}")]
}

impl<R: CaseRepository + 'static> Harness<R> {
    pub(super) fn open_caregiver(&self) -> CaseId {
        self.service
            .open_case(SubjectType::Caregiver, "caregiver-42")
            .expect("case opens")
            .value
            .id
    }

    /// Submit and approve stages until the case sits on `target`.
    pub(super) fn advance_to(&self, case_id: &CaseId, target: StageName) {
        loop {
            let case = self.service.get_case(case_id).expect("case exists").value;
            let stage = case.current_stage().expect("case in progress").name;
            if stage == target {
                return;
            }
            self.approve_current(case_id, stage);
        }
    }

    /// Drive every remaining stage to approval.
    pub(super) fn approve_all(&self, case_id: &CaseId) {
        while let Some(stage) = self
            .service
            .get_case(case_id)
            .expect("case exists")
            .value
            .current_stage()
            .map(|record| record.name)
        {
            self.approve_current(case_id, stage);
        }
    }

    fn approve_current(&self, case_id: &CaseId, stage: StageName) {
        if stage == StageName::Interview {
            let slot_id = format!("slot-{}", case_id.0);
            self.scheduler
                .add_slot(&slot_id, self.clock.now() + Duration::days(2));
            self.service
                .schedule_interview(case_id, &slot_id)
                .expect("interview booked");
            self.service
                .complete_interview(case_id)
                .expect("interview held");
        } else {
            self.service
                .submit_evidence(case_id, stage, evidence(stage.key()))
                .expect("evidence accepted");
        }
        self.service
            .record_decision(case_id, "reviewer-1", ReviewDecision::Approve, None)
            .expect("stage approved");
    }
}

pub(super) fn t0() -> DateTime<Utc> {
    start_time()
}
