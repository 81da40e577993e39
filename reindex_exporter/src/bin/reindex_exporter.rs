use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use reindex_exporter::{
    client::Client,
    collector::Collector,
    config::{self, Config},
    server::{self, Server},
};
use tokio::{runtime::Builder, signal};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::Error),
    #[error("Exporter server returned an error: {0}")]
    Server(#[from] server::Error),
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[command(flatten)]
    args: ExporterArgs,
}

#[derive(Args)]
struct ExporterArgs {
    /// path on disk to a YAML configuration file
    #[clap(long)]
    config_path: Option<PathBuf>,
    /// address to listen on for the landing page and metrics [default: 0.0.0.0:9421]
    #[clap(long = "web.listen-address")]
    listen_address: Option<SocketAddr>,
    /// path under which to expose metrics [default: /metrics]
    #[clap(long = "web.telemetry-path")]
    telemetry_path: Option<String>,
    /// Elasticsearch URL to scrape [default: http://localhost:9200]
    #[clap(long = "es.url")]
    es_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration and exit
    ConfigCheck,
}

fn get_config(args: &ExporterArgs) -> Result<Config, Error> {
    let mut config = Config::load(args.config_path.as_deref())?;

    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    if let Some(telemetry_path) = &args.telemetry_path {
        config.telemetry_path.clone_from(telemetry_path);
    }
    if let Some(es_url) = &args.es_url {
        config.es_url.clone_from(es_url);
    }

    config.validate()?;
    Ok(config)
}

async fn inner_main(config: Config) -> Result<(), Error> {
    let collector = Collector::new(Client::new(&config.es_url));
    let server = Server::bind(config.listen_address, &config.telemetry_path, collector).await?;
    info!(
        "server listening on {addr}, metrics at {path}",
        addr = server.local_addr()?,
        path = config.telemetry_path
    );

    server
        .run(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c"),
                Err(err) => {
                    error!("Unable to listen for ctrl-c: {err}");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;
    Ok(())
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .finish()
        .init();

    let cli = Cli::parse();
    let config = get_config(&cli.args);

    if let Some(Commands::ConfigCheck) = cli.command {
        match config {
            Ok(_) => {
                info!("Configuration is valid");
                std::process::exit(0)
            }
            Err(err) => {
                error!("Configuration validation failed: {err}");
                std::process::exit(1)
            }
        }
    }
    let config = config?;

    let version = env!("CARGO_PKG_VERSION");
    info!(
        "starting reindex_exporter {version} on {es_url}...",
        es_url = config.es_url
    );

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(config));
    info!("Bye. :)");
    res
}
