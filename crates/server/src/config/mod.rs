//! Configuration management for Forge
//!
//! Configuration is stored in RON format. The `git` section is handed to the
//! gateway unchanged.

pub mod loader;

use std::path::PathBuf;

use git_http::GatewaySettings;
use serde::{Deserialize, Serialize};

/// Top-level configuration for Forge
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub git: GatewaySettings,
}

/// Listener and storage settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address to bind, e.g. "0.0.0.0:8000"
    pub listen: String,

    /// Directory holding `forge.db`
    pub db_root: PathBuf,

    /// Value for `Access-Control-Allow-Origin`; CORS is off when unset
    pub access_control_allow_origin: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            db_root: PathBuf::from("data"),
            access_control_allow_origin: None,
        }
    }
}
