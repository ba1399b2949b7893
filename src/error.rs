use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("At least one rate limit must be specified")]
    NoCeilings,
    #[error("Invalid window: max_admissions={max_admissions}, window_seconds={window_seconds}")]
    InvalidWindow {
        max_admissions: u64,
        window_seconds: f64,
    },
    #[error("Request kind must be 'requests' or 'tokens', got '{0}'")]
    InvalidKind(String),
    /// Failure of a [HistoryStore](crate::backend::HistoryStore) implemented outside this crate.
    #[error("Store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    #[error("Redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration and store failures are reported as a plain server error, so that clients can
/// tell them apart from a 429 "try again later".
impl ResponseError for Error {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::InternalServerError().finish()
    }
}
