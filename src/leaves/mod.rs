//! Leave policy & lifecycle engine.
//!
//! Consumes the approval workflow engine: requests are validated against
//! per-type policies, handed off for approval, and carried through a rich
//! post-approval lifecycle (cancellation, recall, sickness-during-vacation,
//! voluntary-work conversion, modify-approved). All balance movements go
//! through the append-only ledger.

pub mod balance;
pub mod handlers;
pub mod models;
pub mod policy;
pub mod repository;
pub mod service;

pub use balance::{BalanceBreakdown, BalanceBucket, BalanceLedger, BalanceTransaction, LeaveBalance, TransactionType};
pub use models::*;
pub use policy::{LeavePolicy, PolicyEngine, PolicyOutcome};
pub use repository::LeaveStore;
pub use service::LeaveService;
