use super::domain::{AccountId, BillingAccount};
use crate::persistence::{RepositoryError, Versioned};

/// Storage abstraction for billing accounts with optimistic concurrency.
pub trait AccountRepository: Send + Sync {
    fn insert(&self, account: BillingAccount)
        -> Result<Versioned<BillingAccount>, RepositoryError>;

    fn fetch(&self, id: &AccountId) -> Result<Option<Versioned<BillingAccount>>, RepositoryError>;

    /// Replace the account if it is still at `expected_version`, returning the new version.
    fn save(&self, account: BillingAccount, expected_version: u64)
        -> Result<u64, RepositoryError>;

    /// Accounts carrying an unpaid invoice, for the billing-cycle ticker.
    ///
    /// Returns at most `limit` accounts in ascending id order, starting strictly after
    /// `after`. The ticker pages with the last id it saw until a short page comes back.
    fn with_outstanding_invoice(
        &self,
        after: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<Versioned<BillingAccount>>, RepositoryError>;
}
