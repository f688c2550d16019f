//! Unified error handling for the harvest pipeline.
//!
//! Two layers: [`AiError`] classifies provider failures so the backoff loop
//! can decide retry-vs-skip-vs-abort without string matching, and
//! [`HarvestError`] is the crate-wide error the orchestrator folds into
//! per-article outcomes. Only configuration and authentication errors are
//! allowed to escape the run loop.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for harvest operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Classified failure from an AI completion provider.
#[derive(Error, Debug)]
pub enum AiError {
    /// Credential rejected or missing. Fatal to the whole run.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Provider asked us to slow down. Retried with backoff.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Network or server-side failure. Retried with backoff.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Provider refused the content. Never retried.
    #[error("content policy refusal: {0}")]
    ContentPolicy(String),

    /// Response arrived but did not contain a completion.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl AiError {
    /// Whether the backoff loop should try this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AiError::RateLimit(_) | AiError::Transient(_))
    }

    /// Whether this failure must abort the entire run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AiError::Auth(_))
    }
}

/// AI pipeline stage names, used in error context and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    ExtractKeyPoints,
    Rewrite,
    Translate,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::ExtractKeyPoints => "extract_key_points",
            PipelineStage::Rewrite => "rewrite",
            PipelineStage::Translate => "translate",
        };
        f.write_str(name)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Malformed or incomplete configuration. Aborts before any request.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP fetch failed (connection failure or non-2xx status).
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// A mandatory selector matched nothing, or matched only empty text.
    #[error("selector for '{field}' matched nothing at {url}")]
    Extraction { field: String, url: String },

    /// An AI stage failed after exhausting its retries.
    #[error("{stage} failed for {url}: {source}")]
    Ai {
        stage: PipelineStage,
        url: String,
        source: AiError,
    },

    /// Writing an output document failed.
    #[error("failed writing {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// YAML serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarvestError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a network error for a URL.
    pub fn network(url: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error for a mandatory selector field.
    pub fn extraction(field: impl Into<String>, url: impl Into<String>) -> Self {
        Self::Extraction {
            field: field.into(),
            url: url.into(),
        }
    }

    /// Wrap a classified provider failure with its stage and article.
    pub fn ai(stage: PipelineStage, url: impl Into<String>, source: AiError) -> Self {
        Self::Ai {
            stage,
            url: url.into(),
            source,
        }
    }

    /// Whether this error must terminate the whole run rather than one article.
    pub fn is_fatal(&self) -> bool {
        match self {
            HarvestError::Config(_) => true,
            HarvestError::Ai { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}
