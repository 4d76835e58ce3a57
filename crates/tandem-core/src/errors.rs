/// Failure taxonomy shared by the progression handlers.
///
/// Trigger-style handlers log these and return; callable operations turn
/// them into typed RPC errors for the client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgressionError {
    /// Missing account, partnership or assignment. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Equal or unset roles, malformed account pairs, writes to history.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Reminder cooldown still running.
    #[error("too soon: try again in {remaining_minutes} minute(s)")]
    RateLimited { remaining_minutes: i64 },

    /// Push could not be delivered. Never rolls back the triggering write.
    #[error("delivery failed: {0}")]
    TransientDelivery(String),

    /// No eligible subtopic for the current round.
    #[error("data integrity: {0}")]
    DataIntegrity(String),
}

impl ProgressionError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::RateLimited { .. } => "rate_limited",
            Self::TransientDelivery(_) => "transient_delivery",
            Self::DataIntegrity(_) => "data_integrity",
        }
    }
}
