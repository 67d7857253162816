use clap::Parser;
use tracing_subscriber::EnvFilter;

use rover_joystick_runtime::config::{Args, RoverConfig};

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RoverConfig::from(Args::parse());

    if let Err(e) = rover_joystick_runtime::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
