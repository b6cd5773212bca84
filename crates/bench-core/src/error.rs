//! Error handling for benchmaq
//!
//! Provides a unified error type and result type for use across all benchmaq components.
//! Errors fall into four classes: transient (retried by the component that raised them),
//! fatal (abort the entry or run), best-effort (logged and skipped) and interruption.

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in a benchmaq run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or missing configuration fields
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Non-transient error reported by a cloud provider
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider reported that the requested capacity is temporarily unavailable
    #[error("Capacity unavailable: {0}")]
    CapacityUnavailable(String),

    /// SSH session, authentication or transfer failure
    #[error("SSH error: {0}")]
    Ssh(String),

    /// Child process could not be spawned, signalled or reaped
    #[error("Process error: {0}")]
    Process(String),

    /// Server never reported healthy
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// Load-generation subprocess failed
    #[error("Trial failed: {0}")]
    Trial(String),

    /// Model weight download failed
    #[error("Download failed: {0}")]
    Download(String),

    /// A bounded wait ran out
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The provider or host has no such resource
    #[error("Not found: {0}")]
    NotFound(String),

    /// Transport failure talking to a provider API
    #[error("Network error: {0}")]
    Network(String),

    /// The operator cancelled the run
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anything else, usually with context attached
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn capacity_unavailable(msg: impl Into<String>) -> Self {
        Self::CapacityUnavailable(msg.into())
    }

    pub fn ssh(msg: impl Into<String>) -> Self {
        Self::Ssh(msg.into())
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    pub fn health_check(msg: impl Into<String>) -> Self {
        Self::HealthCheck(msg.into())
    }

    pub fn trial(msg: impl Into<String>) -> Self {
        Self::Trial(msg.into())
    }

    pub fn download(msg: impl Into<String>) -> Self {
        Self::Download(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn interrupted(msg: impl Into<String>) -> Self {
        Self::Interrupted(msg.into())
    }

    /// Transient failures: waiting and trying again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::CapacityUnavailable(_) | Error::Network(_) | Error::Timeout(_)
        )
    }

    /// Errors that abort the current entry or run.
    ///
    /// "Not found" is excluded because cleanup paths treat it as already done.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable() && !self.is_not_found()
    }

    /// The provider's "capacity temporarily gone" signal, the only class
    /// spot creation retries on
    pub fn is_capacity_unavailable(&self) -> bool {
        matches!(self, Error::CapacityUnavailable(_))
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Short label used as a structured logging field
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "config",
            Error::Provider(_) => "provider",
            Error::CapacityUnavailable(_) => "capacity",
            Error::Ssh(_) => "ssh",
            Error::Process(_) => "process",
            Error::HealthCheck(_) => "health",
            Error::Trial(_) => "trial",
            Error::Download(_) => "download",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::Network(_) => "network",
            Error::Interrupted(_) => "interrupted",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Http(_) => "http",
            Error::Other(_) => "other",
        }
    }
}

/// Attach a description of what was being attempted to a failure
pub trait ErrorContext<T> {
    fn context(self, what: impl Into<String>) -> Result<T>;

    /// Like [`ErrorContext::context`], building the description only on failure
    fn with_context<F>(self, what: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, what: impl Into<String>) -> Result<T> {
        self.with_context(|| what.into())
    }

    fn with_context<F>(self, what: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Other(anyhow::anyhow!("{}: {}", what(), e.into())))
    }
}
