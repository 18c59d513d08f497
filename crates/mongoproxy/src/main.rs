//! mongoproxy - transparent database proxy
//!
//! Relays a database wire protocol between clients and one upstream server
//! and logs the documents of inserts into watched collections.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use mongoproxy::ProxyServer;
use mongoproxy_common::config::{Config, WatchConfig};

#[derive(Parser)]
#[command(name = "mongoproxy")]
#[command(author, version, about = "mongoproxy - transparent database proxy", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start relaying connections
    Serve {
        /// Configuration file path (TOML or JSON)
        #[arg(short, long, default_value = "mongoproxy.toml", env = "MONGOPROXY_CONFIG")]
        config: PathBuf,

        /// Port the proxy listens on
        #[arg(short, long, env = "MONGOPROXY_LISTEN_PORT")]
        listen_port: Option<u16>,

        /// Upstream database host
        #[arg(long, env = "MONGOPROXY_UPSTREAM_HOST")]
        upstream_host: Option<String>,

        /// Upstream database port
        #[arg(long, env = "MONGOPROXY_UPSTREAM_PORT")]
        upstream_port: Option<u16>,

        /// Log inserts into DATABASE.COLLECTION (repeatable)
        #[arg(short, long, env = "MONGOPROXY_WATCH", value_delimiter = ',')]
        watch: Vec<String>,

        /// Emit logs as JSON lines
        #[arg(long, env = "MONGOPROXY_JSON_LOGS")]
        json_logs: bool,
    },

    /// Show version information
    Version,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("mongoproxy=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen_port,
            upstream_host,
            upstream_port,
            watch,
            json_logs,
        } => {
            init_tracing(json_logs)?;

            let mut config = Config::load_or_default(&config).await?;
            if let Some(port) = listen_port {
                config.server.port = port;
            }
            if let Some(host) = upstream_host {
                config.upstream.host = host;
            }
            if let Some(port) = upstream_port {
                config.upstream.port = port;
            }
            for spec in &watch {
                config.watch.push(WatchConfig::parse(spec)?);
            }
            config.validate()?;

            let proxy = ProxyServer::from_config(&config);
            for target in &config.watch {
                let namespace = format!("{}.{}", target.database, target.collection);
                proxy.add_listener(&target.database, &target.collection, move |doc| {
                    info!(namespace = %namespace, "Insert: {}", doc);
                });
            }

            info!("Starting mongoproxy...");

            let shutdown = async {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutdown signal received");
            };

            tokio::select! {
                result = proxy.run() => result?,
                () = shutdown => {}
            }
        }

        Commands::Version => {
            println!("mongoproxy version {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
