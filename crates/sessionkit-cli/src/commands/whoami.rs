//! Whoami command implementation.

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::Args;
use sessionkit::auth;

use crate::cli::ConnectArgs;
use crate::{output, session};

#[derive(Args, Debug)]
pub struct WhoamiArgs {}

pub async fn run(connect: &ConnectArgs, _args: WhoamiArgs) -> Result<()> {
    let session = session::open(connect).await?;

    output::field("Service", &session.config().base_url.to_string());

    let token = session
        .credentials()
        .access_token()
        .context("No active session. Pass --username and --password to log in.")?;

    let claims = auth::decode(token.as_str()).context("Access token is unreadable")?;
    if let Some(sub) = &claims.sub {
        output::field("Subject", sub);
    }
    if let Some(exp) = claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)) {
        output::field("Expires", &exp.to_rfc3339());
    }
    match session.guard().seconds_remaining(&token) {
        Ok(secs) if secs > 0 => output::field("Remaining", &format!("{}s", secs)),
        Ok(_) => output::field("Remaining", "expired"),
        Err(_) => output::field("Remaining", "unknown"),
    }

    Ok(())
}
