use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("non-finite {quantity} at age {age} during the {stage} phase: {value}")]
    NonFiniteValue {
        stage: &'static str,
        quantity: &'static str,
        age: u32,
        value: f64,
    },

    #[error("consumption vector has {actual} entries, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("objective evaluated to a non-finite cost: {value}")]
    NonFiniteCost { value: f64 },

    #[error("optimizer backend failed: {0}")]
    Optimizer(String),

    #[error("matrix decomposition failed: {0}")]
    Decomposition(String),
}

impl ModelError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ModelError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

// Errors raised inside cost/gradient closures travel through argmin as
// `anyhow` values; recover our own variant when that is what was raised.
impl From<argmin::core::Error> for ModelError {
    fn from(err: argmin::core::Error) -> Self {
        match err.downcast::<ModelError>() {
            Ok(model_err) => model_err,
            Err(other) => ModelError::Optimizer(other.to_string()),
        }
    }
}

pub(crate) fn ensure_finite(
    stage: &'static str,
    quantity: &'static str,
    age: u32,
    value: f64,
) -> ModelResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::NonFiniteValue {
            stage,
            quantity,
            age,
            value,
        })
    }
}
