//! Client configuration for Corral.
//!
//! Kubeconfig-style YAML with:
//! - Named connection contexts (server, token file, timeout, endpoint paths)
//! - `current-context` for default selection
//! - `CORRAL_CONFIG_DIR` to relocate the config directory

use std::path::PathBuf;

pub mod client;
pub mod error;

pub use client::{
    ClientConfig, ClientDefaults, Context, DEFAULT_TOKEN_FILE, EndpointPaths, ResolvedContext,
    client_config_path, load_client_config, load_client_config_from, save_client_config,
    save_client_config_to,
};
pub use error::{ConfigError, Result};

const APP_NAME: &str = "corral";

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "CORRAL_CONFIG_DIR";

/// Get the XDG config directory for corral.
///
/// Checks `CORRAL_CONFIG_DIR` env var first, then falls back to platform default.
pub fn xdg_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}
