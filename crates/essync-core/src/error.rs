//! Error types for essync

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Field '{field}' is missing from document")]
    MissingField { field: String },

    #[error("Field '{field}' has an unexpected value {value}: expected {expected}")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error_message() {
        let err = Error::InvalidFieldValue {
            field: "callDate".into(),
            value: "\"abc\"".into(),
            expected: "an integer epoch",
        };
        assert_eq!(
            err.to_string(),
            "Field 'callDate' has an unexpected value \"abc\": expected an integer epoch"
        );
    }
}
