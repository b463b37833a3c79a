//! Get command - read an API path through the authenticated pipeline.

use anyhow::Result;
use clap::Args;

use super::Context;
use super::auth::with_login_hint;
use crate::client::connect;

/// Arguments for the get command.
#[derive(Args, Debug)]
pub struct GetArgs {
    /// API path relative to the server (e.g. api/clusters)
    pub path: String,
}

/// Run the get command.
pub async fn run(args: GetArgs, ctx: &Context) -> Result<()> {
    let conn = connect(ctx)?;

    let body: serde_json::Value = conn
        .client
        .pipeline()
        .get_json(&args.path)
        .await
        .map_err(with_login_hint)?;

    if ctx.json_output {
        println!("{}", body);
    } else {
        println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Ok(())
}
