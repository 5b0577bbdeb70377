//! meteo-tail: print every message on the bus subject.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;

use meteo_core::Config;

#[derive(Parser, Debug)]
#[command(name = "meteo-tail", version, about)]
struct Cli {
    /// NATS server URL (defaults to the configured bus).
    #[arg(long)]
    url: Option<String>,

    /// Subject to follow (defaults to the configured bus).
    #[arg(long)]
    subject: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    meteo_core::init()?;
    let cli = Cli::parse();

    let config = Config::load()?;
    let url = cli.url.unwrap_or(config.bus.url);
    let subject = cli.subject.unwrap_or(config.bus.subject);

    let client = async_nats::connect(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    let mut subscriber = client
        .subscribe(subject.clone())
        .await
        .context("Failed to subscribe")?;
    tracing::info!("Following {} on {}", subject, url);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = subscriber.next() => {
                let Some(message) = message else { break };
                match serde_json::from_slice::<serde_json::Value>(&message.payload) {
                    Ok(payload) => println!("{}", payload),
                    Err(_) => println!("{}", String::from_utf8_lossy(&message.payload)),
                }
            }
        }
    }

    Ok(())
}
