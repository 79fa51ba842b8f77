//! `table_config_list_data`: named tuning profiles referenced by a table's
//! `tuning_profile` field.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::engine_options::TuningProfile;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableConfigList {
    #[serde(default)]
    pub profiles: HashMap<String, TuningProfile>,
}

impl TableConfigList {
    pub fn parse(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::Json("table_config_list_data", e))
    }

    pub fn profile(&self, name: &str) -> Option<&TuningProfile> {
        self.profiles.get(name)
    }
}
