use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use shared::{Hat, WorldMode};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:3000")]
    server: String,

    /// Hat to wear: none, party, egg, magician, bow, cowboy, watermelon, baseball, santa
    #[arg(long, default_value = "none")]
    hat: Hat,

    /// World mode deciding the emoji palette: iceberg or holiday
    #[arg(short = 'm', long, default_value = "iceberg")]
    mode: WorldMode,

    /// Milliseconds between movement frames
    #[arg(short = 't', long, default_value = "50")]
    tick_ms: u64,

    /// Seconds between random emoji, 0 to disable
    #[arg(short = 'e', long, default_value = "5")]
    emoji_every: u64,

    /// Seconds to run before exiting, 0 to run until Ctrl+C
    #[arg(short = 'd', long, default_value = "0")]
    duration: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ClientConfig {
        server_url: args.server,
        hat: args.hat,
        mode: args.mode,
        tick: Duration::from_millis(args.tick_ms.max(1)),
        emoji_every: Duration::from_secs(args.emoji_every),
        ..ClientConfig::default()
    };

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);
    info!("Wearing {} hat in {} mode", config.hat, config.mode);

    let mut client = Client::new(config);

    let duration = args.duration;
    let shutdown = async move {
        if duration > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
        }
    };

    client.run_until(shutdown).await?;

    Ok(())
}
