/// The error taxonomy shared by every stage of the pipeline.
///
/// Each variant carries enough context to be written verbatim into a debug
/// bundle. Only [`ReceiptError::RepositoryError`] is fatal; every other
/// variant resolves into a terminal `done` or `needs_review` outcome for the
/// receipt (see the orchestrator in `receipt-app`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReceiptError {
    #[error("OCR provider `{provider}` failed: {message}")]
    OcrFailure { provider: String, message: String },

    #[error("LLM provider `{provider}` failed: {message}")]
    LlmFailure { provider: String, message: String },

    #[error("LLM provider `{provider}` returned invalid JSON: {message}")]
    LlmInvalidJson { provider: String, message: String },

    #[error("rate limit exceeded for provider `{provider}` (user `{user_id}`)")]
    RateLimited { provider: String, user_id: String },

    #[error("math validation failed: {reason}")]
    MathFailure { reason: String },

    #[error("parser produced no items and no totals: {reason}")]
    ParseDegenerate { reason: String },

    #[error("repository operation failed: {0}")]
    RepositoryError(String),

    #[error("store config error: {0}")]
    StoreConfig(String),
}

impl ReceiptError {
    /// Whether this error is retryable by the next rung of the fallback ladder.
    ///
    /// `RepositoryError` is the only variant that is not: it is fatal and
    /// short-circuits straight to the error folder.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReceiptError::RepositoryError(_))
    }
}

pub type ReceiptResult<T> = Result<T, ReceiptError>;
