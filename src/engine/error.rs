use thiserror::Error;
use ulid::Ulid;

use crate::remote::RemoteError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A date or time string does not match its fixed format.
    #[error("malformed {field}: {value:?}")]
    MalformedInput { field: &'static str, value: String },

    /// A required semantic field is missing or unusable.
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: &'static str,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("not found: {0}")]
    NotFound(Ulid),

    /// The store failed. `persisted` lists the ids this call had already
    /// written (saved or deleted); nothing is rolled back.
    #[error("persistence failed after {} saved: {source}", .persisted.len())]
    Persistence {
        persisted: Vec<Ulid>,
        #[source]
        source: StoreError,
    },

    #[error("recurrence job failed: {0}")]
    Http(#[from] RemoteError),
}

impl EngineError {
    pub(crate) fn malformed(field: &'static str, value: &str) -> Self {
        EngineError::MalformedInput {
            field,
            value: value.to_string(),
        }
    }

    pub(crate) fn missing(field: &'static str) -> Self {
        EngineError::Validation {
            field,
            reason: "required",
        }
    }

    /// Caller's fault; retrying the same input cannot succeed.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedInput { .. }
                | EngineError::Validation { .. }
                | EngineError::LimitExceeded(_)
        )
    }
}

impl From<StoreError> for EngineError {
    fn from(source: StoreError) -> Self {
        EngineError::Persistence {
            persisted: Vec::new(),
            source,
        }
    }
}
