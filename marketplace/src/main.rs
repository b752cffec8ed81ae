//! Analog Society server binary.
//!
//! Reads configuration from the environment and serves until Ctrl-C.

use marketplace::{Config, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    serve(Config::from_env()).await?;
    Ok(())
}
