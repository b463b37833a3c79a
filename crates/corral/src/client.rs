//! Builds an authenticated client from flags and the client config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use corral_auth::{AuthEndpoints, CorralClient, FileTokenStore, Navigator};
use corral_config::{EndpointPaths, ResolvedContext};

use crate::commands::Context;

/// A client together with the settings it was built from.
pub struct Connection {
    pub client: CorralClient,
    pub resolved: ResolvedContext,
}

/// Resolve the target control plane and build a client for it.
pub fn connect(ctx: &Context) -> Result<Connection> {
    let config_dir = corral_config::xdg_config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    let config = corral_config::load_client_config()?;
    let resolved = config.resolve(
        ctx.context_name.as_deref(),
        ctx.server_url.as_deref(),
        &config_dir,
    )?;

    tracing::debug!(
        context = resolved.name.as_deref().unwrap_or("-"),
        server = %resolved.server,
        token_file = %resolved.token_file.display(),
        "Resolved connection"
    );

    let client = CorralClient::builder()
        .base_url(&resolved.server)
        .timeout(Duration::from_secs(resolved.timeout_secs))
        .endpoints(endpoints(&resolved.endpoints))
        .store(Arc::new(FileTokenStore::with_path(resolved.token_file.clone())))
        .navigator(Arc::new(BrowserNavigator))
        .user_agent(format!("corral/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .with_context(|| format!("Invalid server URL '{}'", resolved.server))?;

    Ok(Connection { client, resolved })
}

/// Apply per-context overrides on top of the built-in endpoint paths.
fn endpoints(paths: &EndpointPaths) -> AuthEndpoints {
    let defaults = AuthEndpoints::default();
    AuthEndpoints {
        config: paths.config.clone().unwrap_or(defaults.config),
        token: paths.token.clone().unwrap_or(defaults.token),
        refresh: paths.refresh.clone().unwrap_or(defaults.refresh),
        userinfo: paths.userinfo.clone().unwrap_or(defaults.userinfo),
    }
}

/// Prints the destination and tries to open it in the default browser.
#[derive(Debug)]
pub struct BrowserNavigator;

impl Navigator for BrowserNavigator {
    fn navigate(&self, url: &str) {
        println!();
        println!("Open this URL in your browser:");
        println!();
        println!("  {}", url);
        println!();
        if let Err(e) = open_url(url) {
            tracing::debug!(error = %e, "Could not open browser");
            println!("(Could not open browser automatically)");
            println!();
        }
    }
}

/// Try to open a URL in the default browser.
fn open_url(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).status()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).status()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .status()?;
    }
    Ok(())
}
