use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InferenceError {
    /// None of the datasets lists any output item.
    #[error("No items found in any dataset")]
    EmptyUniverse,
    /// A dataset has no observed outputs at all.
    #[error("Dataset {dataset} has a total output count of zero")]
    InsufficientData { dataset: usize },
    #[error("Invalid sampler settings: {0}")]
    InvalidSettings(String),
    #[error("Inference was cancelled")]
    Cancelled,
    #[error("Bayesian inference failed: {0:#}")]
    Sampling(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, InferenceError>;

impl InferenceError {
    pub(crate) fn from_sampling(err: anyhow::Error) -> Self {
        match err.downcast::<InferenceError>() {
            Ok(inner) => inner,
            Err(err) => InferenceError::Sampling(err),
        }
    }
}
