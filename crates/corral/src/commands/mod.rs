//! CLI command handlers.

pub mod auth;
pub mod config;
pub mod get;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Explicit server URL, if given.
    pub server_url: Option<String>,
    /// Explicit context name, if given.
    pub context_name: Option<String>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}
