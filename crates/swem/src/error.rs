use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwemError>;

/// Sub-component whose variant tag failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Embedding,
    Pooling,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Embedding => f.write_str("embedding"),
            Component::Pooling => f.write_str("pooling"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SwemError {
    #[error("invalid configuration: `{field}` = {value}: {reason}")]
    Config {
        field: String,
        value: String,
        reason: String,
    },

    #[error("unsupported {component} kind `{kind}`")]
    UnsupportedVariant { component: Component, kind: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde_json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}

impl SwemError {
    pub(crate) fn config(
        field: impl Into<String>,
        value: impl fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        SwemError::Config {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Name of the offending field for [`SwemError::Config`].
    pub fn field(&self) -> Option<&str> {
        match self {
            SwemError::Config { field, .. } => Some(field),
            _ => None,
        }
    }
}
