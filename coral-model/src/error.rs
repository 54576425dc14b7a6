use std::fmt::{self, Display};

/// Errors produced by model constructors and value conversions.
#[derive(Debug)]
pub enum ModelError {
    InvalidValue { field: &'static str, value: i64 },
    InvalidId(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidValue { field, value } => {
                write!(f, "invalid value {value} for {field}")
            }
            ModelError::InvalidId(raw) => write!(f, "invalid id: {raw}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
