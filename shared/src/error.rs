use thiserror::Error;

/// Errors raised while loading or validating a [`crate::config::WorldConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors raised while encoding or decoding persisted and transmitted records.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode record: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode record: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Storage key {key} is not a valid entity id")]
    InvalidStorageKey { key: i32 },
}
