//! Request command implementation.

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;
use sessionkit_core::HttpMethod;

use crate::cli::ConnectArgs;
use crate::{output, session};

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    pub method: String,

    /// Path relative to the service URL (e.g., /api/subscriptions)
    pub path: String,

    /// JSON request body
    #[arg(long)]
    pub body: Option<String>,
}

fn parse_method(method: &str) -> Result<HttpMethod> {
    Ok(match method.to_ascii_uppercase().as_str() {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        other => bail!("Unsupported method: {}", other),
    })
}

pub async fn run(connect: &ConnectArgs, args: RequestArgs) -> Result<()> {
    let method = parse_method(&args.method)?;
    let body = args
        .body
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("Request body is not valid JSON")?;

    let session = session::open(connect).await?;
    let response = session
        .api()
        .request(method, &args.path, body)
        .await
        .context("Request failed")?;

    output::note(&format!("HTTP {}", response.status));
    match response.json::<Value>() {
        Ok(json) => output::json_pretty(&json)?,
        Err(_) if !response.body.is_empty() => println!("{}", response.text()),
        Err(_) => {}
    }

    if !response.is_success() {
        bail!("Service returned HTTP {}", response.status);
    }
    Ok(())
}
