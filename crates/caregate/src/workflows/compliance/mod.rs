//! Payment-compliance lock for marketplace billing accounts.
//!
//! An overdue invoice walks the account through reminder states into `Locked`, where the
//! access table withholds new-business capabilities. Full settlement or an audited manual
//! unlock brings it back to `Current`.

pub mod domain;
pub mod escalation;
pub mod orchestrator;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use domain::{
    AccountId, AccountView, BillingAccount, LockState, LockTransition, PaymentEvent,
    PaymentStatus,
};
pub use escalation::{ComplianceError, Settlement};
pub use orchestrator::{ComplianceOrchestrator, ComplianceSweep};
pub use repository::AccountRepository;
pub use router::compliance_router;
pub use service::{ComplianceService, TickOutcome};
