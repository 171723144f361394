use thiserror::Error;

/// Errors the mapper can raise. Mirrors the four error families from the
/// error-handling design: configuration errors and missing input abort the
/// whole batch; per-route mapping failures are recovered (see
/// [`crate::report::UnmappableReason`]) and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("node not found: {0:?}")]
    NodeNotFound(String),

    #[error("link not found: {0:?}")]
    LinkNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV/tabular error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
