//! display-client binary: a long-lived kiosk process driving one screen.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backoff;
mod clock;
mod config;
mod fetch;
mod poller;
mod render;
mod runtime;
mod scroller;
mod socket;
mod view;

use config::ClientConfig;
use render::TermSurface;
use runtime::DisplayRuntime;

#[tokio::main]
async fn main() -> Result<(), String> {
    init_tracing();

    let config = ClientConfig::from_env()?;
    tracing::info!(
        server = %config.server_url,
        lite = config.lite_mode,
        "display client starting"
    );

    let runtime = DisplayRuntime::new(config, Box::new(TermSurface::new()));
    runtime.run().await;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
