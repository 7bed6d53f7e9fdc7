//! Capability table keyed by account role and compliance lock state.
//!
//! Reminder states are informational only; restriction starts at `Locked`, where each
//! role keeps the subset needed to finish running work, talk about it, see its records,
//! and pay.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::workflows::compliance::LockState;

/// Marketplace role owning a billing account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Guardian,
    Agency,
    Caregiver,
    Shop,
}

impl AccountRole {
    pub const fn ordered() -> [Self; 4] {
        [Self::Guardian, Self::Agency, Self::Caregiver, Self::Shop]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Guardian => "guardian",
            Self::Agency => "agency",
            Self::Caregiver => "caregiver",
            Self::Shop => "shop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ordered()
            .into_iter()
            .find(|role| role.label().eq_ignore_ascii_case(value.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    BookNewCaregivers,
    PostNewJobs,
    PurchasePackages,
    AcceptNewJobs,
    AcceptNewOrders,
    CreateListings,
    UpdateAvailability,
    UpdatePricing,
    UpdateInventory,
    CompleteActiveJobs,
    FulfillActiveOrders,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
}

impl Capability {
    pub const fn label(self) -> &'static str {
        match self {
            Self::BookNewCaregivers => "Book new caregivers",
            Self::PostNewJobs => "Post new jobs",
            Self::PurchasePackages => "Purchase care packages",
            Self::AcceptNewJobs => "Accept new jobs",
            Self::AcceptNewOrders => "Accept new orders",
            Self::CreateListings => "Create new listings",
            Self::UpdateAvailability => "Update availability",
            Self::UpdatePricing => "Update pricing",
            Self::UpdateInventory => "Update inventory",
            Self::CompleteActiveJobs => "Complete active jobs",
            Self::FulfillActiveOrders => "Fulfil active orders",
            Self::MessageActiveEngagements => "Message about active engagements",
            Self::ViewRecords => "View existing records",
            Self::MakePayment => "Make a payment",
        }
    }
}

use Capability::*;

const GUARDIAN: &[Capability] = &[
    BookNewCaregivers,
    PostNewJobs,
    PurchasePackages,
    CompleteActiveJobs,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
];

const AGENCY: &[Capability] = &[
    AcceptNewJobs,
    CreateListings,
    UpdateAvailability,
    UpdatePricing,
    CompleteActiveJobs,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
];

const CAREGIVER: &[Capability] = &[
    AcceptNewJobs,
    UpdateAvailability,
    UpdatePricing,
    CompleteActiveJobs,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
];

const SHOP: &[Capability] = &[
    AcceptNewOrders,
    CreateListings,
    UpdatePricing,
    UpdateInventory,
    FulfillActiveOrders,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
];

/// Capabilities every role keeps while locked, intersected with what the role has at all.
const KEEP_THE_LIGHTS_ON: &[Capability] = &[
    CompleteActiveJobs,
    FulfillActiveOrders,
    MessageActiveEngagements,
    ViewRecords,
    MakePayment,
];

fn role_capabilities(role: AccountRole) -> &'static [Capability] {
    match role {
        AccountRole::Guardian => GUARDIAN,
        AccountRole::Agency => AGENCY,
        AccountRole::Caregiver => CAREGIVER,
        AccountRole::Shop => SHOP,
    }
}

/// Total, side-effect-free capability lookup for every role and lock state.
pub fn allowed_capabilities(role: AccountRole, lock_state: LockState) -> BTreeSet<Capability> {
    let granted = role_capabilities(role).iter().copied();
    match lock_state {
        LockState::Current
        | LockState::Reminder3
        | LockState::Reminder5
        | LockState::FinalWarning6 => granted.collect(),
        LockState::Locked => granted
            .filter(|capability| KEEP_THE_LIGHTS_ON.contains(capability))
            .collect(),
    }
}

/// Allowed and withheld capabilities, as shown on the account-restrictions screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestrictionSummary {
    pub role: AccountRole,
    pub lock_state: LockState,
    pub restricted: bool,
    pub allowed: Vec<Capability>,
    pub denied: Vec<Capability>,
}

pub fn restriction_summary(role: AccountRole, lock_state: LockState) -> RestrictionSummary {
    let allowed = allowed_capabilities(role, lock_state);
    let denied: Vec<Capability> = role_capabilities(role)
        .iter()
        .copied()
        .filter(|capability| !allowed.contains(capability))
        .collect();

    RestrictionSummary {
        role,
        lock_state,
        restricted: !denied.is_empty(),
        allowed: allowed.into_iter().collect(),
        denied,
    }
}
