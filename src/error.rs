// src/error.rs

//! Unified error handling for the indexer application.

use std::fmt;

use thiserror::Error;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Archive container magic/header is unrecognized or unreadable
    #[error("Corrupt container {path}: {message}")]
    CorruptContainer { path: String, message: String },

    /// A CDX submission was rejected or failed in transport
    #[error("Submission to collection '{collection}' failed: {reason}")]
    Submit { collection: String, reason: String },

    /// Metadata store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// Rule source fetch/parse failed
    #[error("Rule source error: {0}")]
    RuleSource(String),

    /// Rule engine is in lockdown after a failed refresh
    #[error("Rule engine is locked down after a failed refresh; clear the lockdown flag to resume")]
    Lockdown,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a corrupt-container error.
    pub fn corrupt(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::CorruptContainer {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a submission error with the collection as context.
    pub fn submit(collection: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Submit {
            collection: collection.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Create a rule-source error.
    pub fn rule_source(message: impl Into<String>) -> Self {
        Self::RuleSource(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
