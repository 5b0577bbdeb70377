//! meteo-publish: publish an `external_weather` event on the bus.
//!
//! A running `meteo` service stores the reading and announces it locally.

use anyhow::{Context, Result};
use clap::Parser;

use meteo_core::Config;
use meteo_services::event::SOURCE_EXTERNAL_SCRIPT;
use meteo_services::{Event, EventMeta, ExternalReading};

#[derive(Parser, Debug)]
#[command(name = "meteo-publish", version, about)]
struct Cli {
    /// City name, e.g. "Moscow".
    city: String,

    /// Temperature in °C.
    #[arg(allow_negative_numbers = true)]
    temperature: f64,

    /// Wind speed in km/h.
    #[arg(long)]
    wind_speed: Option<f64>,

    /// NATS server URL (defaults to the configured bus).
    #[arg(long)]
    url: Option<String>,

    /// Subject to publish on (defaults to the configured bus).
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

    let event = Event::ExternalWeather {
        item: Some(ExternalReading {
            city: Some(cli.city),
            temperature: Some(cli.temperature),
            wind_speed: cli.wind_speed,
        }),
        meta: Some(EventMeta::new(SOURCE_EXTERNAL_SCRIPT)),
    };
    let payload = serde_json::to_vec(&event)?;

    let client = async_nats::connect(url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", url))?;
    client
        .publish(subject.clone(), payload.into())
        .await
        .context("Failed to publish")?;
    client.flush().await.context("Failed to flush")?;

    tracing::info!("Published to {}: {}", subject, serde_json::to_string(&event)?);
    Ok(())
}
