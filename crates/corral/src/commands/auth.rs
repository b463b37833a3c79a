//! Auth command - session management.

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Subcommand};
use console::style;
use corral_auth::AuthError;

use super::Context;
use crate::client::connect;

/// Arguments for the auth command.
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Sign in through the browser
    Login {
        /// Route to continue at after signing in
        #[arg(long)]
        next: Option<String>,
    },

    /// Complete a sign-in with the code from the callback page
    Callback {
        /// Authorization code
        code: String,
    },

    /// Show authentication status
    Status,

    /// Show the signed-in user
    Whoami,

    /// Refresh the access token now
    Refresh,

    /// Sign out and clear stored tokens
    Logout,
}

/// Run the auth command.
pub async fn run(args: AuthArgs, ctx: &Context) -> Result<()> {
    match args.command {
        AuthCommand::Login { next } => cmd_login(next.as_deref(), ctx).await,
        AuthCommand::Callback { code } => cmd_callback(&code, ctx).await,
        AuthCommand::Status => cmd_status(ctx).await,
        AuthCommand::Whoami => cmd_whoami(ctx).await,
        AuthCommand::Refresh => cmd_refresh(ctx).await,
        AuthCommand::Logout => cmd_logout(ctx).await,
    }
}

async fn cmd_login(next: Option<&str>, ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let session = conn.client.session();

    if let Some(tokens) = session.tokens().filter(|_| session.is_authenticated()) {
        println!(
            "Already authenticated (expires in {})",
            tokens.expires_in_display(Utc::now())
        );
        println!("Run 'corral auth logout' first to re-authenticate.");
        return Ok(());
    }

    println!("{}", style("Corral Sign-in").bold());
    println!("Server: {}", conn.resolved.server);

    session.redirect_to_login(next).await?;

    println!("After signing in, copy the code shown on the callback page and paste it here:");
    print!("code> ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let code = input.trim();

    if code.is_empty() {
        println!("No code provided, aborting.");
        return Ok(());
    }

    println!("Exchanging code for tokens...");
    let landing = session.handle_callback(code).await?;

    println!();
    println!("{}", style("Authentication successful!").green());
    if landing != corral_auth::DEFAULT_ROUTE {
        println!("Continue at: {}", landing);
    }
    Ok(())
}

async fn cmd_callback(code: &str, ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let landing = conn.client.session().handle_callback(code).await?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "authenticated": true, "route": landing }));
    } else {
        println!("Authentication successful. Continue at: {}", landing);
    }
    Ok(())
}

async fn cmd_status(ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let session = conn.client.session();
    let tokens = session.tokens();
    let now = Utc::now();

    if ctx.json_output {
        let status = serde_json::json!({
            "context": conn.resolved.name,
            "server": conn.resolved.server,
            "token_file": conn.resolved.token_file,
            "authenticated": session.is_authenticated(),
            "expires_at": tokens.as_ref().map(|t| t.expires_at.to_rfc3339()),
            "refreshable": tokens.as_ref().is_some_and(|t| t.has_refresh_token()),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("{}", style("Authentication Status").bold());
    println!("---------------------");
    println!(
        "Context: {}",
        conn.resolved.name.as_deref().unwrap_or("(none)")
    );
    println!("Server:  {}", conn.resolved.server);
    if ctx.verbose {
        println!("Tokens:  {}", conn.resolved.token_file.display());
    }
    println!();

    match tokens {
        Some(tokens) if session.is_authenticated() => {
            println!("Session: {}", style("authenticated").green());
            println!("  Expires in: {}", tokens.expires_in_display(now));
        }
        Some(tokens) if tokens.has_refresh_token() => {
            println!("Session: {}", style("expired").yellow());
            println!("  Run 'corral auth refresh' or any request to renew it");
        }
        _ => {
            println!("Session: {}", style("not authenticated").red());
            println!("  Run 'corral auth login' to sign in");
        }
    }
    Ok(())
}

async fn cmd_whoami(ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let claims = match conn.client.session().fetch_user_info().await {
        Ok(claims) => claims,
        Err(e) => return Err(with_login_hint(e)),
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&claims)?);
        return Ok(());
    }

    println!("{}", style(claims.display_name()).bold());
    println!("  Subject: {}", claims.subject);
    if let Some(email) = &claims.email {
        println!("  Email:   {}", email);
    }
    match &claims.roles {
        Some(roles) if !roles.is_empty() => {
            let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
            println!("  Roles:   {}", roles.join(", "));
        }
        _ => println!("  Roles:   (none)"),
    }
    Ok(())
}

async fn cmd_refresh(ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let session = conn.client.session();

    session.refresh().await.map_err(with_login_hint)?;

    let expires = session
        .tokens()
        .map(|t| t.expires_in_display(Utc::now()))
        .unwrap_or_else(|| "unknown".to_string());
    println!("Access token refreshed (expires in {})", expires);
    Ok(())
}

async fn cmd_logout(ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;
    let was_signed_in = conn.client.session().tokens().is_some();

    conn.client.session().logout().await?;

    if was_signed_in {
        println!("Signed out. Stored tokens removed.");
    } else {
        println!("No stored tokens found.");
    }
    Ok(())
}

/// Attach a next step to errors that mean the session is gone.
pub(crate) fn with_login_hint(err: AuthError) -> anyhow::Error {
    if err.requires_login() {
        anyhow::anyhow!("{}. Run 'corral auth login' to sign in again.", err)
    } else {
        err.into()
    }
}
