use thiserror::Error;

/// Main error type for the simloss crate
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimLossError {
    /// Shape-related errors with detailed suggestions
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Operation errors with context
    #[error("Operation error: {operation} - {message}")]
    OperationError {
        operation: String,
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl SimLossError {
    /// Create a shape error with helpful suggestions
    pub fn shape_error(expected: &str, got: &str, suggestion: Option<&str>) -> Self {
        let message = if let Some(sugg) = suggestion {
            format!("Expected {}, got {}. Suggestion: {}", expected, got, sugg)
        } else {
            format!("Expected {}, got {}", expected, got)
        };
        SimLossError::ShapeError(message)
    }

    /// Create an operation error with context
    pub fn operation_error(operation: &str, message: &str) -> Self {
        SimLossError::OperationError {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<std::io::Error> for SimLossError {
    fn from(err: std::io::Error) -> Self {
        SimLossError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SimLossError {
    fn from(err: serde_json::Error) -> Self {
        SimLossError::SerializationError(err.to_string())
    }
}

/// Result type for simloss operations
pub type SimLossResult<T> = Result<T, SimLossError>;

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ShapeMismatch,
    InvalidOperation,
    ConfigInvalid,
    PreconditionViolated,
    SerializationFailed,
    IoFailed,
}

impl SimLossError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            SimLossError::ShapeError(_) => ErrorCode::ShapeMismatch,
            SimLossError::OperationError { .. } => ErrorCode::InvalidOperation,
            SimLossError::ConfigurationError(_) => ErrorCode::ConfigInvalid,
            SimLossError::InvalidInput(_) => ErrorCode::InvalidOperation,
            SimLossError::InvalidState(_) => ErrorCode::PreconditionViolated,
            SimLossError::SerializationError(_) => ErrorCode::SerializationFailed,
            SimLossError::IoError(_) => ErrorCode::IoFailed,
        }
    }

    /// Check if this is a recoverable error.
    ///
    /// Shape and precondition errors are programming errors and never
    /// recoverable; a bad config file can be fixed and reloaded.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigInvalid | ErrorCode::IoFailed | ErrorCode::SerializationFailed
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SimLossError::ShapeError(msg) => {
                format!("Shape Error: {}\n\nThe pair inputs must be [N, C, 1, 1] with identical shapes and the labels [N, 1, 1, 1]. Check how the batch was assembled.", msg)
            }
            SimLossError::ConfigurationError(msg) => {
                format!("Configuration Error: {}\n\nCheck the alpha, beta and gamma values in your configuration.", msg)
            }
            SimLossError::InvalidState(msg) => {
                format!("Invalid State: {}\n\nCall setup() with the batch shapes before running the loss.", msg)
            }
            SimLossError::OperationError { operation, message } => {
                format!("Operation Error in '{}': {}", operation, message)
            }
            _ => self.to_string(),
        }
    }
}
