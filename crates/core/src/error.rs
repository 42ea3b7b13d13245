//! Error types shared by the renderer crates.

use thiserror::Error;

/// Errors raised outside the GPU layer: windowing, configuration and I/O.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or surface handle errors
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan errors surfaced through non-RHI code (surface creation)
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Invalid configuration values
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the core Error type.
pub type Result<T> = std::result::Result<T, Error>;
