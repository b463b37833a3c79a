//! Config command - connection context management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use corral_config::{ClientConfig, Context as ClientContext};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show configuration file path
    Path,

    /// Show the current context name
    CurrentContext,

    /// List available contexts
    GetContexts,

    /// Switch to a different context
    UseContext {
        /// Context name to switch to
        name: String,
    },

    /// Create or update a context
    SetContext {
        /// Context name
        name: String,

        /// Server URL (e.g., https://corral.example.com)
        #[arg(long = "url")]
        server_url: Option<String>,

        /// File to keep this context's tokens in
        #[arg(long)]
        token_file: Option<PathBuf>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete a context
    DeleteContext {
        /// Context name to delete
        name: String,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Path => cmd_path(),
        ConfigCommand::CurrentContext => cmd_current_context(),
        ConfigCommand::GetContexts => cmd_get_contexts(ctx),
        ConfigCommand::UseContext { name } => cmd_use_context(&name),
        ConfigCommand::SetContext {
            name,
            server_url,
            token_file,
            timeout,
        } => cmd_set_context(&name, server_url, token_file, timeout),
        ConfigCommand::DeleteContext { name } => cmd_delete_context(&name),
    }
}

fn cmd_path() -> Result<()> {
    match corral_config::client_config_path() {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}

fn cmd_current_context() -> Result<()> {
    let config = corral_config::load_client_config()?;

    match &config.current_context {
        Some(name) => println!("{}", name),
        None => {
            println!("No current context set. Use 'corral config use-context <name>' to set one.")
        }
    }

    Ok(())
}

fn cmd_get_contexts(ctx: &Context) -> Result<()> {
    let config = corral_config::load_client_config()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&contexts_json(&config))?);
        return Ok(());
    }

    if config.contexts.is_empty() {
        println!("No contexts configured.");
        println!();
        println!("Create one with:");
        println!("  corral config set-context local --url=http://localhost:8080");
        return Ok(());
    }

    let current = config.current_context.as_deref();

    println!("CURRENT   NAME            SERVER");
    for c in &config.contexts {
        let marker = if current == Some(c.name.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{}         {:<15} {}", marker, c.name, c.server);
    }

    Ok(())
}

fn contexts_json(config: &ClientConfig) -> serde_json::Value {
    let current = config.current_context.as_deref();
    config
        .contexts
        .iter()
        .map(|c| {
            serde_json::json!({
                "name": c.name,
                "server": c.server,
                "current": current == Some(c.name.as_str()),
            })
        })
        .collect()
}

fn cmd_use_context(name: &str) -> Result<()> {
    let mut config = corral_config::load_client_config()?;

    config.use_context(name)?;
    corral_config::save_client_config(&config)?;

    println!("Switched to context \"{}\".", name);

    Ok(())
}

fn cmd_set_context(
    name: &str,
    server_url: Option<String>,
    token_file: Option<PathBuf>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut config = corral_config::load_client_config()?;

    let context = match config.get_context(name) {
        Some(existing) => {
            let mut updated = existing.clone();
            if let Some(url) = server_url {
                updated.server = url;
            }
            if let Some(path) = token_file {
                updated.token_file = Some(path);
            }
            if let Some(t) = timeout {
                updated.timeout = Some(t);
            }
            println!("Context \"{}\" modified.", name);
            updated
        }
        None => {
            let server_url = server_url.ok_or_else(|| {
                anyhow::anyhow!("--url is required when creating a new context")
            })?;
            let mut created = ClientContext::new(name, server_url);
            if let Some(path) = token_file {
                created = created.with_token_file(path);
            }
            if let Some(t) = timeout {
                created = created.with_timeout(t);
            }
            println!("Context \"{}\" created.", name);
            created
        }
    };
    config.set_context(context);

    // First context becomes current
    if config.current_context.is_none() && config.contexts.len() == 1 {
        config.current_context = Some(name.to_string());
        println!("Context \"{}\" set as current context.", name);
    }

    corral_config::save_client_config(&config)?;
    Ok(())
}

fn cmd_delete_context(name: &str) -> Result<()> {
    let mut config = corral_config::load_client_config()?;

    match config.remove_context(name) {
        Some(_) => {
            corral_config::save_client_config(&config)?;
            println!("Context \"{}\" deleted.", name);
            if config.current_context.is_none() {
                println!(
                    "Note: No current context. Use 'corral config use-context <name>' to set one."
                );
            }
        }
        None => {
            println!("Context \"{}\" not found.", name);
        }
    }

    Ok(())
}
