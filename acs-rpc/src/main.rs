use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use acs_core::{EchoEngine, Engine};
use acs_rpc::{serve, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "acs-desktop-agent")]
#[command(about = "Collaboration server exposing the skills engine over JSON-RPC/WebSocket")]
struct Cli {
    /// Listen address for the `/ws` endpoint.
    #[arg(long, default_value = "127.0.0.1:10112")]
    addr: SocketAddr,
    /// Data directory (defaults to $ALICLOUD_SKILLS_HOME, then
    /// ~/.alicloud-skills).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ServerConfig::default();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    // No runtime backend is wired in this build; the echo engine keeps
    // the wire surface exercisable end to end.
    let engine: Arc<dyn Engine> = Arc::new(EchoEngine::default());
    let server = Server::new(engine, config).await?;
    server.install_permission_bridge();

    serve(server, cli.addr).await?;
    Ok(())
}
