use chrono::Duration;
use metrics_exporter_prometheus::PrometheusBuilder;

use super::common::*;
use crate::access::{AccountRole, Capability};
use crate::audit::{ActorRole, AuditAction};
use crate::error::ErrorKind;
use crate::notify::templates;
use crate::workflows::compliance::{AccountId, LockState, PaymentEvent, PaymentStatus};

#[test]
fn seven_days_overdue_locks_in_one_tick() {
    let h = harness();
    let account_id = h.overdue_guardian(7);

    let outcome = h.service.tick(&account_id, h.today()).expect("tick runs");

    assert_eq!(outcome.account.value.lock_state, LockState::Locked);
    let transition = outcome.transition.expect("escalated");
    assert_eq!(transition.from, LockState::Current);
    assert_eq!(transition.days_overdue, 7);
    assert_eq!(h.notifier.templates(), vec![templates::ACCOUNT_LOCKED]);

    let sent = &h.notifier.sent()[0];
    assert_eq!(sent.recipient_id, "guardian-7");
    assert_eq!(sent.params["amount_due"], "5000");
    assert_eq!(sent.params["lock_state"], "locked");

    let allowed = h.service.allowed_capabilities(&account_id).unwrap();
    assert!(!allowed.contains(&Capability::BookNewCaregivers));
    assert!(allowed.contains(&Capability::MakePayment));
}

#[test]
fn repeated_tick_on_the_same_day_changes_nothing() {
    let h = harness();
    let account_id = h.overdue_guardian(5);

    let first = h.service.tick(&account_id, h.today()).unwrap();
    let second = h.service.tick(&account_id, h.today()).unwrap();

    assert_eq!(first.account.value.lock_state, LockState::Reminder5);
    assert!(second.transition.is_none());
    assert_eq!(second.account.version, first.account.version);
    assert_eq!(h.notifier.templates(), vec![templates::REMINDER_DAY_5]);

    let escalations = h
        .audit
        .entries()
        .into_iter()
        .filter(|entry| entry.action == AuditAction::LockEscalated)
        .count();
    assert_eq!(escalations, 1);
}

#[test]
fn daily_ticks_send_each_reminder_once() {
    let h = harness();
    let account_id = h.overdue_guardian(0);

    for offset in 0..9 {
        h.service
            .tick(&account_id, h.today() + Duration::days(offset))
            .unwrap();
    }

    assert_eq!(
        h.notifier.templates(),
        vec![
            templates::REMINDER_DAY_3,
            templates::REMINDER_DAY_5,
            templates::FINAL_WARNING_DAY_6,
            templates::ACCOUNT_LOCKED,
        ]
    );
}

#[test]
fn blank_unlock_reason_is_refused_then_real_reason_unlocks() {
    let h = harness();
    let account_id = h.overdue_guardian(9);
    h.service.tick(&account_id, h.today()).unwrap();
    let locked_version = h.service.get_account(&account_id).unwrap().version;

    let err = h
        .service
        .manual_unlock(&account_id, "admin-3", "   ")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidReason);
    let stored = h.service.get_account(&account_id).unwrap();
    assert_eq!(stored.value.lock_state, LockState::Locked);
    assert_eq!(stored.version, locked_version);

    let unlocked = h
        .service
        .manual_unlock(&account_id, "admin-3", "payment confirmed via bank transfer")
        .expect("unlock succeeds");
    assert_eq!(unlocked.value.lock_state, LockState::Current);

    let entries = h.service.account_history(&account_id).unwrap();
    let denied: Vec<_> = entries
        .iter()
        .filter(|entry| entry.action == AuditAction::AttemptedUnlockDenied)
        .collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].actor_id, "admin-3");

    let unlocks: Vec<_> = entries
        .iter()
        .filter(|entry| entry.action == AuditAction::ManualUnlock)
        .collect();
    assert_eq!(unlocks.len(), 1);
    assert_eq!(unlocks[0].actor_id, "admin-3");
    assert_eq!(unlocks[0].actor_role, ActorRole::Administrator);
    assert_eq!(unlocks[0].before_state, "locked");
    assert_eq!(unlocks[0].after_state, "current");
    assert_eq!(
        unlocks[0].reason.as_deref(),
        Some("payment confirmed via bank transfer")
    );
}

#[test]
fn unlock_keeps_invoice_and_suspends_escalation_for_the_grace_window() {
    let h = harness();
    let account_id = h.overdue_guardian(8);
    h.service.tick(&account_id, h.today()).unwrap();
    h.service
        .manual_unlock(&account_id, "admin-3", "disputed charge under review")
        .unwrap();

    let view = h.service.account_view(&account_id).unwrap();
    assert_eq!(view.outstanding_invoice_id.as_deref(), Some("INV-2025-06"));
    assert_eq!(view.grace_until, Some(h.today() + Duration::days(7)));

    let during = h
        .service
        .tick(&account_id, h.today() + Duration::days(6))
        .unwrap();
    assert!(during.transition.is_none());

    let after = h
        .service
        .tick(&account_id, h.today() + Duration::days(7))
        .unwrap();
    assert_eq!(after.account.value.lock_state, LockState::Locked);
}

#[test]
fn settlement_resets_state_and_audits_once() {
    let h = harness();
    let account_id = h.overdue_guardian(7);
    h.service.tick(&account_id, h.today()).unwrap();

    let err = h
        .service
        .settle_payment(&account_id, "pay-1", 4000)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientAmount);

    let settled = h
        .service
        .settle_payment(&account_id, "pay-2", 5000)
        .expect("payment settles");
    assert_eq!(settled.value.lock_state, LockState::Current);
    assert!(settled.value.outstanding_invoice_id.is_none());

    let settlements: Vec<_> = h
        .audit
        .entries()
        .into_iter()
        .filter(|entry| entry.action == AuditAction::PaymentSettled)
        .collect();
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].actor_role, ActorRole::PaymentGateway);
    assert_eq!(settlements[0].before_state, "locked");
    assert_eq!(
        h.notifier.templates().last().map(String::as_str),
        Some(templates::PAYMENT_CONFIRMED)
    );

    let allowed = h.service.allowed_capabilities(&account_id).unwrap();
    assert!(allowed.contains(&Capability::BookNewCaregivers));
}

#[test]
fn failed_gateway_event_leaves_account_alone() {
    let h = harness();
    let account_id = h.overdue_guardian(7);
    h.service.tick(&account_id, h.today()).unwrap();
    let before = h.audit.entries().len();

    let failed = PaymentEvent {
        account_id: account_id.clone(),
        payment_ref: "pay-declined".to_string(),
        amount: 5000,
        status: PaymentStatus::Failed,
    };
    assert!(h.service.handle_payment_event(&failed).unwrap().is_none());
    assert_eq!(h.audit.entries().len(), before);

    let succeeded = PaymentEvent {
        status: PaymentStatus::Succeeded,
        payment_ref: "pay-ok".to_string(),
        ..failed
    };
    let stored = h
        .service
        .handle_payment_event(&succeeded)
        .unwrap()
        .expect("settled");
    assert_eq!(stored.value.lock_state, LockState::Current);
}

#[test]
fn notifier_outage_does_not_undo_the_lock() {
    let h = harness();
    let account_id = h.overdue_guardian(10);
    h.notifier.set_failing(true);

    let outcome = h.service.tick(&account_id, h.today()).expect("tick runs");

    assert_eq!(outcome.account.value.lock_state, LockState::Locked);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.service.notifications().pending(), 1);
    assert_eq!(
        h.service.get_account(&account_id).unwrap().value.lock_state,
        LockState::Locked
    );
}

#[test]
fn concurrent_write_surfaces_stale_state() {
    let h = harness();
    let account_id = h.overdue_guardian(7);
    let audited = h.audit.entries().len();

    h.repository.interfere_once();
    let err = h.service.tick(&account_id, h.today()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StaleState);
    assert_eq!(h.audit.entries().len(), audited);
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn unknown_account_and_closed_invoice_errors() {
    let h = harness();
    let missing = AccountId("acct-missing".to_string());
    assert_eq!(
        h.service.tick(&missing, h.today()).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let account_id = h
        .service
        .open_account("shop-1", AccountRole::Shop)
        .unwrap()
        .value
        .id;
    assert_eq!(
        h.service
            .settle_payment(&account_id, "pay-3", 100)
            .unwrap_err()
            .kind(),
        ErrorKind::NothingOutstanding
    );
    assert!(h
        .service
        .tick(&account_id, h.today())
        .unwrap()
        .transition
        .is_none());
}

#[test]
fn account_view_lists_restrictions_for_locked_shop() {
    let h = harness();
    let account_id = h
        .service
        .open_account("shop-2", AccountRole::Shop)
        .unwrap()
        .value
        .id;
    h.service
        .issue_invoice(&account_id, "INV-S", 1200, h.today() - Duration::days(8))
        .unwrap();
    h.service.tick(&account_id, h.today()).unwrap();

    let view = h.service.account_view(&account_id).unwrap();
    assert_eq!(view.lock_state, LockState::Locked);
    assert_eq!(view.days_overdue, 8);
    assert!(view.restricted_capabilities.contains(&Capability::CreateListings));
    assert!(view.allowed_capabilities.contains(&Capability::FulfillActiveOrders));
}

#[test]
fn lock_transition_metric_counts_only_real_changes() {
    let h = harness();
    let recorder = PrometheusBuilder::new().build_recorder();
    let current = "caregate_lock_transitions_total{to=\"current\"}";

    metrics::with_local_recorder(&recorder, || {
        let on_time = h.overdue_guardian(1);
        h.service
            .settle_payment(&on_time, "pay-early", 5000)
            .expect("settles while current");
        let reviewed = h.overdue_guardian(2);
        h.service
            .manual_unlock(&reviewed, "admin-3", "goodwill review")
            .expect("unlock of a current account succeeds");
    });
    assert!(!recorder.handle().render().contains(current));

    metrics::with_local_recorder(&recorder, || {
        let late = h.overdue_guardian(9);
        h.service.tick(&late, h.today()).unwrap();
        h.service
            .settle_payment(&late, "pay-late", 5000)
            .expect("settles locked account");
    });
    let rendered = recorder.handle().render();
    assert!(rendered.contains(&format!("{current} 1")));
    assert!(rendered.contains("caregate_lock_transitions_total{to=\"locked\"} 1"));
}
