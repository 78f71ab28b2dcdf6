/// Core error type for the SDK.
///
/// Adapter crates map their specific failures into this type so the dispatch
/// engine can tell fatal transport errors apart from per-record problems.
/// Handler failures are deliberately not a variant here: they are contained
/// at the worker boundary as `anyhow::Error` and never propagate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    #[error("session store error: {0}")]
    Session(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
