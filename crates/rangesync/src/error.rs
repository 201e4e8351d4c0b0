//! Error types for the row hashing library.

use thiserror::Error;

/// Main error type for row hashing, packing and protocol framing.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested digest algorithm is not registered.
    ///
    /// Both ends must hash with the same algorithm, so this is fatal for the
    /// comparison rather than something to fall back from.
    #[error("Unsupported digest algorithm: {0}")]
    UnknownDigestAlgorithm(String),

    /// A digest was requested before `digest::init_registry` ran.
    #[error("Digest registry used before initialization")]
    RegistryNotInitialized,

    /// Malformed or truncated wire data.
    #[error("Decode error at offset {offset}: {message}")]
    Decode { offset: usize, message: String },

    /// Unexpected verb or argument list in a protocol command.
    #[error("Command error: {0}")]
    Command(String),

    /// IO error (file and stream operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Decode error at the given input offset
    pub fn decode(offset: usize, message: impl Into<String>) -> Self {
        SyncError::Decode {
            offset,
            message: message.into(),
        }
    }

    /// Create a Command error
    pub fn command(message: impl Into<String>) -> Self {
        SyncError::Command(message.into())
    }

    /// Process exit code for this error class.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) => 2,
            SyncError::UnknownDigestAlgorithm(_) | SyncError::RegistryNotInitialized => 3,
            SyncError::Decode { .. } | SyncError::Command(_) => 4,
            SyncError::Io(_) | SyncError::Json(_) => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for row hashing operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_algorithm_names_the_algorithm() {
        let err = SyncError::UnknownDigestAlgorithm("whirlpool".into());
        assert!(err.to_string().contains("whirlpool"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away");
        let err = SyncError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error: peer went away"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_decode_helper() {
        let err = SyncError::decode(7, "truncated string");
        assert_eq!(err.to_string(), "Decode error at offset 7: truncated string");
        assert_eq!(err.exit_code(), 4);
    }
}
