//! Calendar / working-day kernel.
//!
//! Location-aware working-day arithmetic: weekly profiles, holiday recurrence
//! expansion (fixed, yearly, Easter-relative), company closures, per-date
//! exceptions, and the aggregated per-day range view consumed by the UI.

pub mod models;
pub mod repository;
pub mod service;

pub use models::*;
pub use repository::CalendarStore;
pub use service::CalendarService;
