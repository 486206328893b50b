use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The launch payload could not be decoded into a user with a numeric id.
    /// Unrecoverable for the current session.
    #[error("malformed launch payload: {0}")]
    MalformedPayload(String),

    #[error("launch payload signature is invalid")]
    InvalidSignature,

    #[error("launch payload expired: signed {age_secs}s ago, limit is {max_age_secs}s")]
    ExpiredPayload { age_secs: i64, max_age_secs: u64 },

    /// Transport or backend failure. Transient, never retried automatically.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] BackendError),

    /// No record for the id yet. Callers treat this as "balance unknown".
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("session identity has not been resolved")]
    Unresolved,
}

impl Error {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Error::MalformedPayload(detail.into())
    }

    /// Whether a manual retry of the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_) | Error::UserNotFound(_))
    }
}

/// Failure reported by a [`crate::store::UserStore`] or
/// [`crate::store::ReferralStore`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("backend responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid backend payload: {0}")]
    Decode(String),

    #[error("balance of {telegram_id} would drop below zero")]
    BalanceUnderflow { telegram_id: String },

    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Decode(err.to_string())
    }
}
