// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building the adapter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0} environment variable is not set")]
    MissingVariable(&'static str),
}

/// Errors raised by the lifecycle of a listener (the mesh input or the control endpoint).
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Input is already running")]
    AlreadyRunning,

    #[error("Input is not running")]
    NotRunning,

    #[error("Could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Shutdown timeout exceeded")]
    ShutdownTimeout,
}

/// Errors raised by [`crate::library::Library`].
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Library is already running")]
    AlreadyRunning,

    #[error("Library is not running")]
    NotRunning,

    #[error("Could not start the mesh input: {0}")]
    InputStart(#[source] InputError),

    #[error("Could not stop the mesh input: {0}")]
    InputStop(#[source] InputError),
}
