//! External collaborator interfaces.
//!
//! The core never owns identity, notification delivery or audit storage; it
//! talks to those systems through the traits in this module. Each trait ships
//! with an in-memory implementation used by the bootstrap binary and tests.

pub mod audit;
pub mod auth;
pub mod config;
pub mod notification;

pub use audit::{AuditEntry, AuditSink, TracingAuditSink};
pub use auth::{DepartmentInfo, DirectoryClient, DirectoryUser, InMemoryDirectory, RoleRef, ServiceInfo};
pub use config::{ConfigClient, InMemoryConfig, LeaveTypeConfig};
pub use notification::{InMemoryNotifier, Notification, NotificationType, Notifier};
