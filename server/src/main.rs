use clap::Parser;
use env_logger::Env;
use log::info;
use server::network::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Maximum random offset from the spawn point, per axis
    #[arg(long, default_value_t = shared::DEFAULT_SPAWN_JITTER)]
    spawn_jitter: f32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        spawn_jitter: args.spawn_jitter.max(0.0),
    };

    info!("Starting plaza server on {}", config.bind_addr);

    let server = Server::new(&config).await?;
    server.run_until(tokio::signal::ctrl_c()).await?;

    Ok(())
}
