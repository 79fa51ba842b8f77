use std::path::PathBuf;

use thiserror::Error;

/// Configuration load and parse errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error on \"{0}\": {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("TOML parse error in \"{0}\": {1}")]
    Toml(PathBuf, #[source] toml::de::Error),

    #[error("JSON parse error in payload \"{0}\": {1}")]
    Json(&'static str, #[source] serde_json::Error),

    #[error("unknown data center \"{0}\"")]
    UnknownDc(String),

    #[error("unknown node \"{0}#{1}\"")]
    UnknownNode(String, u32),

    #[error("table \"{0}.{1}\" not found in schema")]
    UnknownTable(String, String),
}
