//! Registry error types.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while loading or validating campaign configuration.
///
/// All of these are fatal at load time: a malformed registry means the
/// campaign never starts.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no pools declared")]
    NoPools,

    #[error("no platforms declared")]
    NoPlatforms,

    #[error("pool {0} has no agents")]
    EmptyPool(String),

    #[error("duplicate pool id: {0}")]
    DuplicatePool(String),

    #[error("duplicate agent id: {0}")]
    DuplicateAgent(String),

    #[error("duplicate platform id: {0}")]
    DuplicatePlatform(String),

    #[error("platform {0} requires no labels")]
    NoLabels(String),
}
