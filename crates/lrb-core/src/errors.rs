/// Core error type for the relay.
///
/// Adapter crates map their transport errors into this type so the relay engine
/// can classify failures consistently (transient vs rejected payload).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("payload rejected: {0}")]
    PayloadRejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
