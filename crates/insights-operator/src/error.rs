// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for insights-operator.

use thiserror::Error;

/// Operator errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A hook tool call failed.
    #[error("Model error: {0}")]
    Model(#[from] crate::model::ModelError),

    /// Talking to Pebble failed.
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Charm metadata could not be parsed.
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_yaml::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the operator Error.
pub type Result<T> = std::result::Result<T, Error>;
