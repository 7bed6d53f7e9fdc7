use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, NaiveDate};

use crate::access::AccountRole;
use crate::clock::{Clock, FixedClock};
use crate::config::ComplianceConfig;
use crate::persistence::{RepositoryError, Versioned};
use crate::workflows::compliance::{
    AccountId, AccountRepository, BillingAccount, ComplianceService,
};
use crate::workflows::test_support::{dispatcher, fixed_clock, MemoryAudit, RecordingNotifier};

#[derive(Default)]
pub(super) struct MemoryAccountRepository {
    accounts: Mutex<HashMap<AccountId, Versioned<BillingAccount>>>,
    /// Bumps the stored version right after the next fetch, simulating a concurrent writer.
    interfere: AtomicBool,
}

impl MemoryAccountRepository {
    pub(super) fn interfere_once(&self) {
        self.interfere.store(true, Ordering::SeqCst);
    }
}

impl AccountRepository for MemoryAccountRepository {
    fn insert(
        &self,
        account: BillingAccount,
    ) -> Result<Versioned<BillingAccount>, RepositoryError> {
        let mut guard = self.accounts.lock().expect("repository mutex poisoned");
        if guard.contains_key(&account.id) {
            return Err(RepositoryError::Conflict);
        }
        let stored = Versioned::new(1, account);
        guard.insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn fetch(&self, id: &AccountId) -> Result<Option<Versioned<BillingAccount>>, RepositoryError> {
        let mut guard = self.accounts.lock().expect("repository mutex poisoned");
        let fetched = guard.get(id).cloned();
        if self.interfere.swap(false, Ordering::SeqCst) {
            if let Some(stored) = guard.get_mut(id) {
                stored.version += 1;
            }
        }
        Ok(fetched)
    }

    fn save(
        &self,
        account: BillingAccount,
        expected_version: u64,
    ) -> Result<u64, RepositoryError> {
        let mut guard = self.accounts.lock().expect("repository mutex poisoned");
        let current = guard.get(&account.id).ok_or(RepositoryError::NotFound)?;
        if current.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                expected: expected_version,
                found: current.version,
            });
        }
        let version = expected_version + 1;
        guard.insert(account.id.clone(), Versioned::new(version, account));
        Ok(version)
    }

    fn with_outstanding_invoice(
        &self,
        after: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<Versioned<BillingAccount>>, RepositoryError> {
        let guard = self.accounts.lock().expect("repository mutex poisoned");
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

pub(super) struct Harness {
    pub(super) service: Arc<ComplianceService<MemoryAccountRepository>>,
    pub(super) repository: Arc<MemoryAccountRepository>,
    pub(super) audit: Arc<MemoryAudit>,
    pub(super) notifier: Arc<RecordingNotifier>,
    pub(super) clock: Arc<FixedClock>,
}

pub(super) fn harness() -> Harness {
    let repository = Arc::new(MemoryAccountRepository::default());
    let audit = Arc::new(MemoryAudit::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = fixed_clock();
    let service = Arc::new(ComplianceService::new(
        repository.clone(),
        audit.clone(),
        dispatcher(notifier.clone()),
        clock.clone(),
        &ComplianceConfig::default(),
    ));

    Harness {
        service,
        repository,
        audit,
        notifier,
        clock,
    }
}

impl Harness {
    pub(super) fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Guardian account carrying a 5000 invoice that fell due `days_ago` days before today.
    pub(super) fn overdue_guardian(&self, days_ago: i64) -> AccountId {
        let account_id = self
            .service
            .open_account("guardian-7", AccountRole::Guardian)
            .expect("account opens")
            .value
            .id;
        self.service
            .issue_invoice(
                &account_id,
                "INV-2025-06",
                5000,
                self.today() - Duration::days(days_ago),
            )
            .expect("invoice issued");
        account_id
    }
}
