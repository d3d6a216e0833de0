//! Error types for the reconciliation engine

use thiserror::Error;

use crate::api::ProviderError;

/// Engine result type
pub type Result<T> = std::result::Result<T, AsgError>;

/// Errors that can occur while reconciling an Auto Scaling Group
#[derive(Error, Debug)]
pub enum AsgError {
    /// The desired-state document is invalid; detected pre-flight, before any
    /// API call is attempted.
    #[error("invalid group spec: {0}")]
    InvalidSpec(String),

    /// A provider call failed with an error the engine does not retry.
    /// Carries the operation and group for context.
    #[error("error {op} (Auto Scaling Group {group}): {source}")]
    Provider {
        /// The operation that was in flight (e.g. "creating Auto Scaling Group")
        op: &'static str,
        /// The group the operation targeted
        group: String,
        /// The underlying provider error
        #[source]
        source: ProviderError,
    },

    /// Capacity never converged on the desired threshold before the deadline.
    #[error("timeout waiting for capacity in Auto Scaling Group {group}: {reason}")]
    CapacityTimeout {
        /// The group being waited on
        group: String,
        /// The unmet condition, e.g. "need at least 3 healthy instances, have 1"
        reason: String,
    },

    /// Draining before deletion did not reach zero instances in time.
    #[error("draining Auto Scaling Group {group} timed out: group still has {remaining} instances")]
    DrainTimeout {
        /// The group being drained
        group: String,
        /// Instances still present when the deadline elapsed
        remaining: usize,
    },

    /// The group was still describable after the post-delete deadline.
    #[error("Auto Scaling Group {group} still exists after deletion")]
    GroupStillExists {
        /// The group that refused to disappear
        group: String,
    },

    /// JSON serialization/deserialization error (spec documents, reports)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AsgError {
    /// Create an input-validation error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }

    /// Wrap a provider error with operation and group context
    pub fn provider(op: &'static str, group: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            op,
            group: group.into(),
            source,
        }
    }
}
