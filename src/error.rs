//! Error types for the inbox responder.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Mail provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Interaction log error: {0}")]
    Log(#[from] LogError),
}

impl Error {
    /// Whether this error is a credential/token problem that must abort the run.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Auth(e) => !e.is_transient(),
            Error::Provider(e) => e.is_auth_failure(),
            Error::Llm(e) => e.is_auth_failure(),
            Error::Log(LogError::Auth(e)) => !e.is_transient(),
            Error::Log(_) => false,
            Error::Config(_) => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {0} not found")]
    NotFound(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Credential and token errors. Fatal unless [`AuthError::is_transient`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Cannot read credential file {path}: {reason}")]
    CredentialFile { path: String, reason: String },

    #[error("Token grant rejected by {provider}: {reason}")]
    GrantRejected { provider: String, reason: String },

    #[error("Login rejected by {provider}: {reason}")]
    LoginRejected { provider: String, reason: String },

    #[error("Invalid signing key: {0}")]
    SigningKey(String),

    #[error("Token endpoint unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// A token endpoint that is down or unreachable is a network problem, not a
    /// credential problem.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Unavailable(_))
    }
}

/// Mail provider (Gmail API, IMAP, SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} connection failed: {reason}")]
    Connection { provider: String, reason: String },

    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Failed to send reply via {provider}: {reason}")]
    SendFailed { provider: String, reason: String },

    #[error("{provider} rate limited")]
    RateLimited { provider: String },

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ProviderError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ProviderError::Auth(e) if !e.is_transient())
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, LlmError::AuthFailed { .. })
    }
}

/// Interaction log sink errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("CSV write to {path} failed: {source}")]
    Csv {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Google Sheets request failed: {0}")]
    Sheets(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
