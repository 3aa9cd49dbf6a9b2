use creatorpay_source::SourceError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("content source failed: {0}")]
    UpstreamFetch(#[from] SourceError),
    #[error("payout decision failed: {0}")]
    Decision(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("background task failed: {0}")]
    Task(String),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
