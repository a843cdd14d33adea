//! tweet-relay - relays tagged tweets into a GroupMe bot.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌────────────┐ search  ┌──────────────────────────────┐  send  ┌──────────┐
//! │  twitter   │ ◄────── │            relay             │ ─────► │ groupme  │
//! │ (source/)  │         │ fetch ─► queue ─► post loop  │        │ (dest/)  │
//! └────────────┘         └──────────────────────────────┘        └──────────┘
//!                                      │ faults
//!                                      ▼
//!                                  main.rs
//! ```
//!
//! * **`source/`** - the `FeedSource` trait, `FeedItem`/`Watermark`, and the
//!   Twitter search implementation.
//! * **`destination/`** - the `MessageSink` trait and the GroupMe bot client.
//! * **`relay/`** - the fetch and post loops, the queue between them, and the
//!   start/stop lifecycle.
//! * **`config`** - flags and environment variables.
//! * **`telemetry`** - tracing subscriber setup.
//! * **`main`** - wires everything together and handles Ctrl-C.

mod config;
mod destination;
mod error;
mod relay;
mod source;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use config::Cli;
use destination::groupme::GroupMeBot;
use relay::Relay;
use source::twitter::TwitterSearch;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();

    // -- clients -------------------------------------------------------------
    let http = cli.http_client().context("building HTTP client")?;

    let source = TwitterSearch::new(cli.twitter_bearer_token.as_str(), http.clone())
        .context("configuring Twitter search")?
        .with_base_url(cli.twitter_base_url.as_str())
        .with_screening(cli.screening())
        .with_page_size(cli.queue_capacity);

    let sink = GroupMeBot::new(cli.groupme_bot_id.as_str(), http)
        .context("configuring GroupMe bot")?
        .with_base_url(cli.groupme_base_url.as_str());

    // -- relay ---------------------------------------------------------------
    let mut relay = Relay::builder()
        .source(Arc::new(source))
        .destination(Arc::new(sink))
        .tags(cli.tags.iter().cloned())
        .options(cli.relay_options())
        .build()
        .context("configuring relay")?;

    let mut faults = relay.faults().context("fault stream already taken")?;
    relay.start(cli.poll_interval())?;
    info!(
        query = relay.query(),
        interval = ?cli.poll_interval(),
        "polling for new tweets; press Ctrl-C to stop"
    );

    // -- wait for Ctrl-C or a halting fault ----------------------------------
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                info!("interrupt received, shutting down");
                break;
            }
            Some(fault) = faults.recv() => {
                if fault.halted {
                    error!(stage = %fault.stage, error = %fault.error, "relay halted, shutting down");
                    break;
                }
            }
        }
    }

    // -- shutdown ------------------------------------------------------------
    relay.stop().await?;
    info!(state = %relay.state(), "waiting for queued items");
    match tokio::time::timeout(cli.drain_timeout(), relay.drain()).await {
        Ok(drained) => {
            let sent = drained?;
            info!(sent, "shutdown complete");
        }
        Err(_) => warn!(
            timeout = ?cli.drain_timeout(),
            "queued items were not all delivered before the drain timeout"
        ),
    }

    Ok(())
}
