use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;
use crate::general::General;

/// The static, node-local config file (`laser.toml`). Everything else
/// (schemas, cluster topology, tuning, traffic limits) arrives later from
/// the registry and is held by the running `ConfigStore`, not this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: General,
}

impl Config {
    /// Load from disk, falling back to defaults with a warning if the file
    /// doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::Io(path.to_path_buf(), err)),
        };

        toml::from_str(&contents).map_err(|err| Error::Toml(path.to_path_buf(), err))
    }
}
