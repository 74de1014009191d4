//! Error types shared across the Bizreg crates

use thiserror::Error;

/// Result type alias for Bizreg operations
pub type Result<T> = std::result::Result<T, BizregError>;

/// Main error type for Bizreg
#[derive(Error, Debug)]
pub enum BizregError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

}

impl BizregError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.csv");
        let err: BizregError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }

    #[test]
    fn test_config_error_message() {
        let err = BizregError::config("IMPORT_BATCH_SIZE must be greater than 0");
        assert_eq!(
            err.to_string(),
            "Configuration error: IMPORT_BATCH_SIZE must be greater than 0"
        );
    }
}
