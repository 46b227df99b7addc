//! Core error kinds shared across the approval, leave and calendar services.
//!
//! The transport layer maps these onto HTTP statuses; inside the core they
//! drive recovery: ledger and state-machine failures abort the operation,
//! collaborator failures degrade (see `clients`).

use uuid::Uuid;

/// Errors surfaced by the core services.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Conflict with existing {entity} {id}: {detail}")]
    Conflict {
        entity: &'static str,
        id: Uuid,
        detail: String,
    },

    #[error("Validation failed: {}", errors.join("; "))]
    ValidationFailure {
        errors: Vec<String>,
        warnings: Vec<String>,
    },

    #[error("Business rule violated ({rule}): {message}")]
    BusinessRuleViolation { rule: &'static str, message: String },

    #[error("No workflow configured for entity type: {0}")]
    NoWorkflowConfigured(String),

    #[error("External collaborator unavailable: {0}")]
    ExternalUnavailable(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn conflict(entity: &'static str, id: Uuid, detail: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            id,
            detail: detail.into(),
        }
    }

    pub fn rule(rule: &'static str, message: impl Into<String>) -> Self {
        Self::BusinessRuleViolation {
            rule,
            message: message.into(),
        }
    }

    pub fn validation(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self::ValidationFailure { errors, warnings }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
