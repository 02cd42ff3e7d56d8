//! Watch command implementation.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use futures_util::StreamExt;
use sessionkit::Connectivity;
use sessionkit_core::{Envelope, MessageKind};
use sessionkit_net::TungsteniteConnector;

use crate::cli::ConnectArgs;
use crate::{output, session};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Output messages as JSON
    #[arg(long)]
    pub json: bool,

    /// Only show messages of this type (e.g., payment_failed)
    #[arg(long)]
    pub kind: Option<String>,
}

fn parse_kind(kind: &str) -> Result<MessageKind> {
    serde_json::from_value(serde_json::Value::String(kind.to_string()))
        .with_context(|| format!("Unknown message type: {}", kind))
}

pub async fn run(connect: &ConnectArgs, args: WatchArgs) -> Result<()> {
    let filter = args.kind.as_deref().map(parse_kind).transpose()?;

    let session = session::open(connect).await?;
    if !session.is_authenticated() {
        bail!("No active session. Pass --username and --password to log in.");
    }

    output::note("Connecting to real-time channel...");
    output::note("Press Ctrl+C to stop.");

    let mut channel = session.realtime(Arc::new(TungsteniteConnector::new()));
    let mut events = channel
        .events()
        .context("Channel messages already taken")?;

    let mut state = channel.subscribe_state();
    let states = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            output::note(&format!("channel {}", current));
            if current.is_terminal() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = events.next() => match message {
                Some(message) => {
                    if filter.is_none_or(|kind| kind == message.kind) {
                        print_message(&message, args.json)?;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                channel.close().await;
                break;
            }
        }
    }
    states.abort();

    if channel.connectivity() == Connectivity::GaveUp {
        bail!("Gave up reconnecting to the real-time channel");
    }
    Ok(())
}

fn print_message(message: &Envelope, json: bool) -> Result<()> {
    if json {
        return output::json(message);
    }

    let label = serde_json::to_value(message.kind)?
        .as_str()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let label = match message.kind {
        MessageKind::PaymentFailed | MessageKind::SubscriptionExpired => label.red(),
        MessageKind::PaymentSucceeded => label.green(),
        MessageKind::SubscriptionUpdated | MessageKind::BalanceUpdated => label.cyan(),
        _ => label.yellow(),
    };

    let payload = serde_json::to_string(&message.payload)?;
    println!("{} {}", label, payload.dimmed());
    Ok(())
}
