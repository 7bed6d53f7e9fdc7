use caregate::audit::{AuditError, AuditLogEntry, AuditTrail, EntityKind};
use caregate::notify::{Notification, Notifier, NotifyError};
use caregate::persistence::{RepositoryError, Versioned};
use caregate::workflows::compliance::{AccountId, AccountRepository, BillingAccount};
use caregate::workflows::verification::{
    newest_first, CaseFilter, CaseId, CaseOutcome, CasePage, CaseRepository, InterviewScheduler,
    InterviewSlot, InterviewStatus, SchedulingError, VerificationCase,
};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn save_versioned<K, T>(
    records: &mut HashMap<K, Versioned<T>>,
    key: K,
    value: T,
    expected_version: u64,
) -> Result<u64, RepositoryError>
where
    K: std::hash::Hash + Eq,
{
    let current = records.get(&key).ok_or(RepositoryError::NotFound)?;
    if current.version != expected_version {
        return Err(RepositoryError::VersionConflict {
            expected: expected_version,
            found: current.version,
        });
    }
    let version = expected_version + 1;
    records.insert(key, Versioned::new(version, value));
    Ok(version)
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryCaseRepository {
    records: Arc<Mutex<HashMap<CaseId, Versioned<VerificationCase>>>>,
}

impl CaseRepository for InMemoryCaseRepository {
    fn insert(
        &self,
        case: VerificationCase,
    ) -> Result<Versioned<VerificationCase>, RepositoryError> {
        let mut guard = lock(&self.records);
        if guard.contains_key(&case.id) {
            return Err(RepositoryError::Conflict);
        }
        let stored = Versioned::new(1, case);
        guard.insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn fetch(&self, id: &CaseId) -> Result<Option<Versioned<VerificationCase>>, RepositoryError> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn save(
        &self,
        case: VerificationCase,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let key = case.id.clone();
        save_versioned(&mut *lock(&self.records), key, case, expected_version)
    }

    fn active(
        &self,
        after: Option<&CaseId>,
        limit: usize,
    ) -> Result<Vec<Versioned<VerificationCase>>, RepositoryError> {
        let guard = lock(&self.records);
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
        let guard = lock(&self.records);
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

#[derive(Default, Clone)]
pub(crate) struct InMemoryAccountRepository {
    records: Arc<Mutex<HashMap<AccountId, Versioned<BillingAccount>>>>,
}

impl AccountRepository for InMemoryAccountRepository {
    fn insert(
        &self,
        account: BillingAccount,
    ) -> Result<Versioned<BillingAccount>, RepositoryError> {
        let mut guard = lock(&self.records);
        if guard.contains_key(&account.id) {
            return Err(RepositoryError::Conflict);
        }
        let stored = Versioned::new(1, account);
        guard.insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn fetch(&self, id: &AccountId) -> Result<Option<Versioned<BillingAccount>>, RepositoryError> {
        Ok(lock(&self.records).get(id).cloned())
    }

    fn save(
        &self,
        account: BillingAccount,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let key = account.id.clone();
        save_versioned(&mut *lock(&self.records), key, account, expected_version)
    }

    fn with_outstanding_invoice(
        &self,
        after: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<Versioned<BillingAccount>>, RepositoryError> {
        let guard = lock(&self.records);
        let mut open: Vec<_> = guard
            .values()
            .filter(|stored| stored.value.outstanding_invoice_id.is_some())
            .filter(|stored| !after.is_some_and(|after| stored.value.id <= *after))
            .cloned()
            .collect();
        open.sort_by(|left, right| left.value.id.cmp(&right.value.id));
        open.truncate(limit);
        Ok(open)
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAuditTrail {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
}

impl AuditTrail for InMemoryAuditTrail {
    fn append(&self, entry: AuditLogEntry) -> Result<(), AuditError> {
        lock(&self.entries).push(entry);
        Ok(())
    }

    fn entries_for(
        &self,
        entity_type: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<AuditLogEntry>, AuditError> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|entry| entry.entity_type == entity_type && entry.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

/// Stand-in for the SMS gateway: every notification becomes a structured log line.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifier {
    delivered: Arc<Mutex<Vec<Notification>>>,
}

impl LoggingNotifier {
    pub(crate) fn delivered(&self) -> Vec<Notification> {
        lock(&self.delivered).clone()
    }
}

impl Notifier for LoggingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient_id,
            template = %notification.template,
            params = ?notification.params,
            "notification sent"
        );
        lock(&self.delivered).push(notification.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CalendarEntry {
    slot: InterviewSlot,
    reserved_by: Option<CaseId>,
    status: InterviewStatus,
}

/// Interview calendar seeded with hourly office-hours slots.
#[derive(Default, Clone)]
pub(crate) struct InMemoryInterviewCalendar {
    entries: Arc<Mutex<BTreeMap<String, CalendarEntry>>>,
}

impl InMemoryInterviewCalendar {
    /// Slots from 09:00 to 16:00 UTC on each of the `days` days after `from`.
    pub(crate) fn with_office_hours(from: DateTime<Utc>, days: i64) -> Self {
        let calendar = Self::default();
        let start = from.date_naive();
        for offset in 1..=days {
            let day = start + Duration::days(offset);
            for hour in 9..=16 {
                if let Some(starts_at) = day.and_hms_opt(hour, 0, 0) {
                    calendar.add_slot(starts_at.and_utc());
                }
            }
        }
        calendar
    }

    fn add_slot(&self, starts_at: DateTime<Utc>) {
        let slot_id = slot_id_for(starts_at.date_naive(), starts_at.hour());
        lock(&self.entries).insert(
            slot_id.clone(),
            CalendarEntry {
                slot: InterviewSlot {
                    slot_id: slot_id.clone(),
                    starts_at,
                    available: true,
                },
                reserved_by: None,
                status: InterviewStatus::Pending,
            },
        );
    }
}

fn slot_id_for(day: NaiveDate, hour: u32) -> String {
    format!("slot-{}-{hour:02}", day.format("%Y%m%d"))
}

impl InterviewScheduler for InMemoryInterviewCalendar {
    fn slot(&self, slot_id: &str) -> Result<Option<InterviewSlot>, SchedulingError> {
        Ok(lock(&self.entries).get(slot_id).map(|entry| InterviewSlot {
            available: entry.slot.available && entry.reserved_by.is_none(),
            ..entry.slot.clone()
        }))
    }

    fn reserve(&self, slot_id: &str, case_id: &CaseId) -> Result<(), SchedulingError> {
        let mut guard = lock(&self.entries);
        let entry = guard
            .get_mut(slot_id)
            .ok_or_else(|| SchedulingError::UnknownSlot(slot_id.to_string()))?;
        if entry.reserved_by.is_some() {
            return Err(SchedulingError::SlotTaken(slot_id.to_string()));
        }
        entry.reserved_by = Some(case_id.clone());
        Ok(())
    }

    fn release(&self, slot_id: &str) -> Result<(), SchedulingError> {
        if let Some(entry) = lock(&self.entries).get_mut(slot_id) {
            entry.reserved_by = None;
            entry.status = InterviewStatus::Pending;
        }
        Ok(())
    }

    fn interview_status(&self, slot_id: &str) -> Result<InterviewStatus, SchedulingError> {
        lock(&self.entries)
            .get(slot_id)
            .map(|entry| entry.status)
            .ok_or_else(|| SchedulingError::UnknownSlot(slot_id.to_string()))
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
