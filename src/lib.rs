//! KRONOS workforce-management core.
//!
//! The Approval & Leave Core of the KRONOS backend: a generic approval
//! workflow engine, the leave policy & lifecycle engine that consumes it,
//! the location-aware working-day calendar kernel and the append-only
//! balance ledger.
//!
//! ## Subsystems
//!
//! - **approvals**: entity-agnostic workflows — selection by predicate,
//!   approver assignment, ANY/ALL/SEQUENTIAL/MAJORITY tallying,
//!   expirations, reminders and resolution callbacks
//! - **leaves**: request state machine, per-type policy chain, recall and
//!   interruption handling, balance deduction and restoration
//! - **calendar**: weekly profiles, holiday recurrence (fixed, yearly,
//!   Easter-relative), closures, exceptions and the range aggregator
//! - **jobs**: idempotent scheduled sweeps
//!
//! External concerns (directory, notification delivery, audit storage)
//! enter through the traits in [`clients`]. The deployment wraps the
//! services in whatever transport the product demands; the handlers in
//! each module are the reference HTTP shell.

pub mod approvals;
pub mod calendar;
pub mod clients;
pub mod error;
pub mod jobs;
pub mod leaves;

pub use approvals::ApprovalService;
pub use calendar::CalendarService;
pub use error::{CoreError, CoreResult};
pub use leaves::LeaveService;
