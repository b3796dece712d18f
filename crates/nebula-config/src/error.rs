//! Configuration error types.

/// Errors raised while loading, saving, or parsing `config.ron`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read bake config: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write bake config: {0}")]
    Write(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("failed to parse bake config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    #[error("failed to serialize bake config: {0}")]
    Serialize(#[source] ron::Error),
}
