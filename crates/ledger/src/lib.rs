//! Peerlink ledgers
//!
//! Two persistent ledgers backed by the shared SQLite store:
//! - [`links::LinkLedger`]: issuance, redemption and expiry of share-links
//! - [`access::AccessLedger`]: per-user access request state machine

pub mod access;
pub mod links;

pub use access::{AccessLedger, AccessRequest, ApprovedUser, AuthStats, RequestStatus};
pub use links::{LinkLedger, RedeemOutcome, ShareLink, UsageLogEntry};
