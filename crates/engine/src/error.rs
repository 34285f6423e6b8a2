use hireline_core::status::describe_states;
use hireline_core::{AmountError, Lifecycle};
use hireline_storage::StorageError;
use serde_json::json;
use thiserror::Error;

/// Errors returned by engine operations.
///
/// Every refusal is raised before the operation's snapshot commits, so an
/// error always means nothing was written.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The operation is not legal from the record's current status.
    #[error("cannot {operation} {entity} {id}: status is '{actual}', expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: String,
        operation: &'static str,
        expected: String,
        actual: String,
    },

    /// The caller's role or identity does not match the operation.
    #[error("{actor} is not allowed to {operation} {entity} {id}")]
    Unauthorized {
        actor: String,
        operation: &'static str,
        entity: &'static str,
        id: String,
    },

    #[error("proposal {proposal_id} has used all {limit} negotiation rounds")]
    NegotiationLimitExceeded { proposal_id: String, limit: u8 },

    #[error("project {project_id} has already accepted proposal {accepted_proposal_id}")]
    AlreadyAccepted {
        project_id: String,
        accepted_proposal_id: String,
    },

    /// Optimistic concurrency conflict. Safe to retry after re-reading.
    #[error("{entity} {id} was modified concurrently (read at version {expected_version}); re-read and retry")]
    StaleState {
        entity: &'static str,
        id: String,
        expected_version: i64,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl EngineError {
    /// Stable machine-readable code for front ends.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::Unauthorized { .. } => "unauthorized",
            EngineError::NegotiationLimitExceeded { .. } => "negotiation_limit_exceeded",
            EngineError::AlreadyAccepted { .. } => "already_accepted",
            EngineError::StaleState { .. } => "stale_state",
            EngineError::Validation { .. } => "validation_error",
            EngineError::NotFound { .. } => "not_found",
            EngineError::Storage(_) => "storage_error",
        }
    }

    /// Structured context (entity, id, expected vs actual) for the error body.
    pub fn details(&self) -> serde_json::Value {
        match self {
            EngineError::InvalidState {
                entity,
                id,
                operation,
                expected,
                actual,
            } => json!({
                "entity": entity,
                "id": id,
                "operation": operation,
                "expected": expected,
                "actual": actual,
            }),
            EngineError::Unauthorized {
                actor,
                operation,
                entity,
                id,
            } => json!({
                "actor": actor,
                "operation": operation,
                "entity": entity,
                "id": id,
            }),
            EngineError::NegotiationLimitExceeded { proposal_id, limit } => json!({
                "entity": "proposal",
                "id": proposal_id,
                "limit": limit,
            }),
            EngineError::AlreadyAccepted {
                project_id,
                accepted_proposal_id,
            } => json!({
                "entity": "project",
                "id": project_id,
                "accepted_proposal_id": accepted_proposal_id,
            }),
            EngineError::StaleState {
                entity,
                id,
                expected_version,
            } => json!({
                "entity": entity,
                "id": id,
                "expected_version": expected_version,
            }),
            EngineError::Validation { field, .. } => json!({ "field": field }),
            EngineError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            EngineError::Storage(_) => json!({}),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StaleState { .. })
    }

    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn amount(field: &'static str, err: AmountError) -> Self {
        EngineError::validation(field, err.to_string())
    }

    /// `actual` is not one of the `allowed` states for `operation`.
    pub(crate) fn wrong_state<L: Lifecycle>(
        id: &str,
        operation: &'static str,
        allowed: &[L],
        actual: L,
    ) -> Self {
        EngineError::InvalidState {
            entity: L::ENTITY,
            id: id.to_string(),
            operation,
            expected: describe_states(allowed),
            actual: actual.to_string(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConcurrentConflict {
                kind,
                id,
                expected_version,
            } => EngineError::StaleState {
                entity: kind.as_str(),
                id,
                expected_version,
            },
            StorageError::NotFound { kind, id } => EngineError::NotFound {
                entity: kind.as_str(),
                id,
            },
            other => EngineError::Storage(other),
        }
    }
}

/// Require the table edge `from -> to`.
pub(crate) fn ensure_transition<L: Lifecycle>(
    id: &str,
    operation: &'static str,
    from: L,
    to: L,
) -> Result<(), EngineError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::wrong_state(id, operation, &L::sources_of(to), from))
    }
}

/// Require `actual` to be one of `allowed`, for operations narrower than the
/// table (e.g. starting a milestone only from `pending`).
pub(crate) fn ensure_status<L: Lifecycle>(
    id: &str,
    operation: &'static str,
    allowed: &[L],
    actual: L,
) -> Result<(), EngineError> {
    if allowed.contains(&actual) {
        Ok(())
    } else {
        Err(EngineError::wrong_state(id, operation, allowed, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hireline_core::{EscrowStatus, ProposalStatus};
    use hireline_storage::RecordKind;

    #[test]
    fn transition_refusal_names_expected_sources() {
        let err = ensure_transition(
            "e-1",
            "request release",
            EscrowStatus::PaymentSubmitted,
            EscrowStatus::PendingRelease,
        )
        .unwrap_err();
        match &err {
            EngineError::InvalidState {
                entity,
                expected,
                actual,
                ..
            } => {
                assert_eq!(*entity, "escrow");
                assert_eq!(expected, "verified_held");
                assert_eq!(actual, "payment_submitted");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(err.details()["operation"], "request release");
    }

    #[test]
    fn ensure_status_accepts_listed_states() {
        let live = [
            ProposalStatus::Pending,
            ProposalStatus::Negotiating,
            ProposalStatus::FinalOffer,
        ];
        assert!(ensure_status("p", "counter", &live, ProposalStatus::FinalOffer).is_ok());
        let err = ensure_status("p", "counter", &live, ProposalStatus::Withdrawn).unwrap_err();
        assert!(err.to_string().contains("pending|negotiating|final_offer"));
    }

    #[test]
    fn storage_conflict_maps_to_stale_state() {
        let err: EngineError = StorageError::ConcurrentConflict {
            kind: RecordKind::Proposal,
            id: "pr-1".into(),
            expected_version: 3,
        }
        .into();
        assert_eq!(err.code(), "stale_state");
        assert!(err.is_retryable());
        assert_eq!(err.details()["expected_version"], 3);

        let err: EngineError = StorageError::NotFound {
            kind: RecordKind::Deliverable,
            id: "d-9".into(),
        }
        .into();
        assert_eq!(err.to_string(), "deliverable d-9 not found");
    }
}
