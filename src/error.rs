//! Crate-wide error types.

/// Errors surfaced by fallible entry points (`SyncConfig` loading and socket
/// construction). The per-frame control loop itself never returns a
/// `Result`: every failure it can encounter is logged and absorbed so the
/// frame always advances (see the crate's error handling design).
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("TOML deserialization error: {source}")]
    TomlDecode {
        #[from]
        source: toml::de::Error,
    },

    #[error("TOML serialization error: {source}")]
    TomlEncode {
        #[from]
        source: toml::ser::Error,
    },

    #[error("beacon decode error: {0}")]
    BeaconDecode(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
