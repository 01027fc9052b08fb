//! Error types for Troupe.

use async_openai::error::OpenAIError;
use thiserror::Error;

/// Library-level error type for Troupe operations.
#[derive(Error, Debug)]
pub enum TroupeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("Model provider returned HTTP {status}: {message}")]
    ProviderStatus { status: u16, message: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("MCP error: {0}")]
    Mcp(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Team error: {0}")]
    Team(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] OpenAIError),
}

impl TroupeError {
    /// Whether retrying the same model call could succeed.
    ///
    /// Rejections (bad request, auth) are final; rate limits and server errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            TroupeError::ProviderStatus { status, .. } => *status == 429 || *status >= 500,
            TroupeError::Http(e) => e.status().map_or(true, |s| s.as_u16() == 429 || s.is_server_error()),
            // async-openai has already retried 429/5xx before it reports an API error
            TroupeError::OpenAI(e) => !matches!(
                e,
                OpenAIError::ApiError(_) | OpenAIError::InvalidArgument(_) | OpenAIError::JSONDeserialize(_)
            ),
            TroupeError::Provider(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for Troupe operations.
pub type Result<T> = std::result::Result<T, TroupeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_env_lists_every_name() {
        let err = TroupeError::MissingEnv(vec![
            "OPENAI_API_KEY".to_string(),
            "GITHUB_ACCESS_TOKEN".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: OPENAI_API_KEY, GITHUB_ACCESS_TOKEN"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(TroupeError::Provider("overloaded".to_string()).is_transient());
        assert!(!TroupeError::InvalidArgument("n".to_string()).is_transient());
    }

    #[test]
    fn test_only_rate_limits_and_server_errors_are_retried() {
        let status = |status| TroupeError::ProviderStatus {
            status,
            message: "error".to_string(),
        };
        assert!(status(429).is_transient());
        assert!(status(500).is_transient());
        assert!(status(529).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());

        assert!(TroupeError::OpenAI(OpenAIError::StreamError("reset".to_string())).is_transient());
        assert!(!TroupeError::OpenAI(OpenAIError::InvalidArgument("bad".to_string())).is_transient());
    }
}
