//! Generic approval workflow engine.
//!
//! Entity-agnostic: any service can externalize an approval by creating a
//! request for its `(entity_type, entity_id)` pair. Workflow selection,
//! approver assignment, multi-level decision tallying, expiration handling
//! and reminders all live here; the originating service learns the outcome
//! through the resolution callback.

pub mod callbacks;
pub mod engine;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod service;

pub use callbacks::{CallbackPayload, CallbackSender, HttpCallbackSender, RecordingCallbackSender};
pub use engine::WorkflowEngine;
pub use models::*;
pub use repository::ApprovalStore;
pub use service::ApprovalService;
