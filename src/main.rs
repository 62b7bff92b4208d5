use browser_telemetry_bridge::audit::UnconfiguredAuditRunner;
use browser_telemetry_bridge::{Config, Server};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "browser-telemetry-bridge", version, about)]
struct Cli {
    /// Requested listen port; the next free port is probed if busy.
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Bind address.
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> browser_telemetry_bridge::Result<()> {
    let mut config = Config::load(cli.config)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    config.validate()?;

    let server = Server::new(config, Arc::new(UnconfiguredAuditRunner));
    server.run().await
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = if verbose {
        EnvFilter::new("debug").add_directive("chromiumoxide=info".parse().unwrap())
    } else {
        EnvFilter::from_default_env()
            .add_directive("info".parse().unwrap())
            .add_directive("chromiumoxide=off".parse().unwrap())
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
