use thiserror::Error;

/// CLI-specific errors with contextual messages and suggestions
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing
    #[error("File not found: {path}")]
    FileNotFound {
        path: String,
        suggestion: String,
    },

    /// Configuration batch rejected
    #[error("Configuration error in {path}: {message}")]
    ConfigurationError {
        path: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Invalid command-line input
    #[error("Invalid input: {message}")]
    InvalidInput { message: String, suggestion: String },
}

impl CliError {
    /// Create a file not found error with a suggestion
    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
            suggestion: format!(
                "Check that the file exists and the path is correct: {}",
                path
            ),
        }
    }

    /// Create a configuration error for a batch file
    pub fn configuration_error(path: &str, message: &str) -> Self {
        Self::ConfigurationError {
            path: path.to_string(),
            message: message.to_string(),
            source: None,
        }
    }

    /// Create an invalid input error with a suggestion
    pub fn invalid_input(message: &str, suggestion: &str) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
            suggestion: suggestion.to_string(),
        }
    }

    /// The suggestion attached to this error, if any
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::FileNotFound { suggestion, .. } | Self::InvalidInput { suggestion, .. } => {
                Some(suggestion.as_str())
            }
            Self::ConfigurationError { .. } => None,
        }
    }
}

/// Exit codes for different error scenarios
pub mod exit_codes {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error
    pub const CONFIG_ERROR: i32 = 3;

    /// Invalid input
    pub const INVALID_INPUT: i32 = 4;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_not_found_suggestion() {
        let err = CliError::file_not_found("missing.json");
        assert!(err.suggestion().unwrap().contains("missing.json"));
        assert!(err.to_string().contains("missing.json"));
    }

    #[test]
    fn test_invalid_input() {
        let err = CliError::invalid_input("bad flag", "try --help");
        match err {
            CliError::InvalidInput { message, .. } => assert_eq!(message, "bad flag"),
            _ => panic!("Wrong error type"),
        }
    }
}
