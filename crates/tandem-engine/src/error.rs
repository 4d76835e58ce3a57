use tandem_core::ProgressionError;
use tandem_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Progression(#[from] ProgressionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Domain failure carried by this error, with store lookups that came
    /// back empty treated as `NotFound`.
    pub fn as_progression(&self) -> Option<ProgressionError> {
        match self {
            Self::Progression(e) => Some(e.clone()),
            Self::Store(StoreError::NotFound(what)) => {
                Some(ProgressionError::NotFound(what.clone()))
            }
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Progression(e) => e.error_kind(),
            Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Store(_) => "store",
        }
    }
}
