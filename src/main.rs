use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use meteo_core::Config;
use meteo_services::App;

#[tokio::main]
async fn main() -> Result<()> {
    meteo_core::init()?;

    let (config, _) = Config::load_validated()?;
    tracing::info!("{} starting", config.app_title);

    let app = App::build(&config)?;

    // Stand-in live subscriber: log every frame the broadcaster fans out
    let mut live = app.broadcaster.subscribe();
    let feed = tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(frame) => tracing::info!(target: "meteo::live", "{}", frame),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Live feed skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    app.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    app.shutdown().await;
    feed.abort();

    Ok(())
}
