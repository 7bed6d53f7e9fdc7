//! Verification pipeline and payment-compliance lock engines for the care marketplace.
//!
//! Caregivers and agencies pass through an ordered, reviewer-gated verification pipeline
//! before going live, and every billing account is escalated through reminder and lock
//! states as its invoice goes overdue. Both engines mirror every transition to the audit
//! trail and talk to the outside world only through the collaborator traits defined here.

pub mod access;
pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod telemetry;
pub mod workflows;
