use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or zero-sized patch, frame or configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Model artifact cannot be parsed or does not match the running extractor.
    #[error("corrupt model: {0}")]
    CorruptModel(String),

    /// Transient capture failure; the current cycle yields no candidates.
    #[error("no frame available")]
    NoFrame,

    /// Solver stopped at its iteration cap. Reported as a warning, the
    /// parameters found so far are still usable.
    #[error("training did not converge within {iterations} iterations")]
    TrainingNonConvergence { iterations: usize },

    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::CorruptModel(msg.into())
    }
}
