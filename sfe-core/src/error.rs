//! Common error types for SFE

use crate::filter::FilterError;
use crate::types::ParseError;
use thiserror::Error;

/// Common result type for SFE operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the registry, database and configuration layers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored setting value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML configuration or installation file could not be parsed
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Type descriptor string is malformed
    #[error("Type descriptor error: {0}")]
    Parse(#[from] ParseError),

    /// Filter construction, configuration or execution error
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// A stored filter is its own ancestor
    #[error("Configuration cycle: filter {0} is its own ancestor")]
    ConfigurationCycle(i64),

    /// Filter group still referenced by stored filters
    #[error("Filter group '{symbolic}' is referenced by {references} filter(s)")]
    GroupInUse { symbolic: String, references: i64 },

    /// No factory registered for a stored class identifier
    #[error("Unknown filter class: {0}")]
    UnknownFilterClass(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
