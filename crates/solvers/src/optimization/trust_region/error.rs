use crate::optimization::evaluate::EvalError;

use super::{ConfigError, RegionError};

/// Errors that can occur during a trust-region search.
///
/// Non-finite objective values are not errors; see [`super::Status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid region: {0}")]
    InvalidRegion(#[from] RegionError),

    #[error("model error: {0}")]
    Model(Box<dyn std::error::Error + Send + Sync>),

    #[error("problem error: {0}")]
    Problem(Box<dyn std::error::Error + Send + Sync>),
}

impl<ME, PE> From<EvalError<ME, PE>> for Error
where
    ME: std::error::Error + Send + Sync + 'static,
    PE: std::error::Error + Send + Sync + 'static,
{
    fn from(err: EvalError<ME, PE>) -> Self {
        match err {
            EvalError::Model(e) => Error::Model(Box::new(e)),
            EvalError::Input(e) | EvalError::Objective(e) => Error::Problem(Box::new(e)),
        }
    }
}
