use std::sync::Arc;

use chrono::Duration;
use tokio_util::sync::CancellationToken;

use super::common::*;
use crate::audit::AuditAction;
use crate::config::VerificationConfig;
use crate::workflows::verification::{
    CaseId, CaseRepository, InterviewStatus, ReviewDecision, StageName, StageStatus,
    VerificationOrchestrator,
};

fn current_status(h: &Harness<MemoryCaseRepository>, case_id: &CaseId) -> StageStatus {
    h.service
        .get_case(case_id)
        .unwrap()
        .value
        .current_stage()
        .map(|stage| stage.status)
        .expect("case in progress")
}

fn orchestrator_for(
    h: &Harness<MemoryCaseRepository>,
) -> VerificationOrchestrator<MemoryCaseRepository, MemoryScheduler> {
    VerificationOrchestrator::new(h.service.clone(), &VerificationConfig::default())
}

fn book_interview(h: &Harness<MemoryCaseRepository>, slot_id: &str) -> CaseId {
    let case_id = h.open_caregiver();
    h.advance_to(&case_id, StageName::Interview);
    h.scheduler.add_slot(slot_id, t0() + Duration::hours(3));
    h.service
        .schedule_interview(&case_id, slot_id)
        .expect("interview booked");
    case_id
}

#[test]
fn occurred_interview_moves_to_review() {
    let h = harness();
    let case_id = book_interview(&h, "slot-occurred");
    h.scheduler
        .set_status("slot-occurred", InterviewStatus::Occurred);

    let orchestrator = orchestrator_for(&h);
    let sweep = orchestrator.run_cycle().expect("sweep runs");

    assert_eq!(sweep.interviews_completed, 1);
    assert_eq!(current_status(&h, &case_id), StageStatus::PendingReview);
}

#[test]
fn pending_interview_is_released_only_after_grace() {
    let h = harness();
    let case_id = book_interview(&h, "slot-late");
    let orchestrator = orchestrator_for(&h);

    h.clock.advance(Duration::hours(4));
    let sweep = orchestrator.run_cycle().unwrap();
    assert_eq!(sweep.interviews_released, 0);
    assert_eq!(current_status(&h, &case_id), StageStatus::Scheduled);

    h.clock.advance(Duration::hours(1));
    let sweep = orchestrator.run_cycle().unwrap();
    assert_eq!(sweep.interviews_released, 1);
    assert_eq!(current_status(&h, &case_id), StageStatus::NotStarted);

    let missed = h
        .audit
        .entries()
        .into_iter()
        .find(|entry| entry.action == AuditAction::InterviewMissed)
        .expect("missed interview audited");
    assert_eq!(missed.actor_id, "system");
}

#[test]
fn missed_interview_is_released_immediately() {
    let h = harness();
    let case_id = book_interview(&h, "slot-missed");
    h.scheduler.set_status("slot-missed", InterviewStatus::Missed);

    let orchestrator = orchestrator_for(&h);
    let sweep = orchestrator.run_cycle().unwrap();

    assert_eq!(sweep.interviews_released, 1);
    assert_eq!(current_status(&h, &case_id), StageStatus::NotStarted);
    assert_eq!(h.scheduler.reserved_by("slot-missed"), None);
}

#[test]
fn sweep_pages_past_the_batch_size() {
    let h = harness();
    let cases: Vec<CaseId> = (0..5)
        .map(|n| {
            let slot_id = format!("slot-paged-{n}");
            let case_id = book_interview(&h, &slot_id);
            h.scheduler.set_status(&slot_id, InterviewStatus::Missed);
            case_id
        })
        .collect();
    let config = VerificationConfig {
        sweep_batch_size: 2,
        ..VerificationConfig::default()
    };

    let sweep = VerificationOrchestrator::new(h.service.clone(), &config)
        .run_cycle()
        .expect("sweep runs");

    assert_eq!(sweep.scanned, 5);
    assert_eq!(sweep.interviews_released, 5);
    for case_id in &cases {
        assert_eq!(current_status(&h, case_id), StageStatus::NotStarted);
    }
}

#[test]
fn sweep_expires_lapsed_evidence_once() {
    let h = harness();
    let case_id = h.open_caregiver();
    h.approve_all(&case_id);
    let orchestrator = orchestrator_for(&h);

    h.clock.advance(Duration::days(400));
    let first = orchestrator.run_cycle().unwrap();
    let second = orchestrator.run_cycle().unwrap();

    assert_eq!(first.evidence_expired, 1);
    assert_eq!(second.evidence_expired, 0);
    let stored = h.repository.fetch(&case_id).unwrap().unwrap();
    assert_eq!(
        stored.value.current_stage().map(|stage| stage.name),
        Some(StageName::PoliceClearance)
    );
}

#[test]
fn sweep_retries_parked_notifications() {
    let h = harness();
    let case_id = h.open_caregiver();
    h.notifier.set_failing(true);
    h.service
        .submit_evidence(&case_id, StageName::Certificates, evidence("cert.pdf"))
        .unwrap();
    h.service
        .record_decision(&case_id, "reviewer-1", ReviewDecision::Approve, None)
        .unwrap();
    h.notifier.set_failing(false);

    let orchestrator = orchestrator_for(&h);
    h.clock.advance(Duration::minutes(1));
    let sweep = orchestrator.run_cycle().unwrap();

    assert_eq!(sweep.notifications.delivered, 1);
    assert_eq!(h.service.notifications().pending(), 0);
}

#[tokio::test]
async fn background_loop_stops_on_cancellation() {
    let h = harness();
    let config = VerificationConfig {
        sweep_interval_secs: 1,
        ..VerificationConfig::default()
    };
    let orchestrator = Arc::new(VerificationOrchestrator::new(h.service.clone(), &config));
    let shutdown = CancellationToken::new();

    let handle = orchestrator.start(shutdown.clone());
    shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("loop exits promptly")
        .expect("task does not panic");
}
