#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sharessh::share::auth::{GitHubKeys, KeyAuthorizer};
use sharessh::share::config::{
    resolve_bind_address, resolve_debug, resolve_host_key, resolve_keys_url, resolve_port,
    resolve_shell,
};
use sharessh::share::hint::{IP_ECHO_URL, share_hint};
use sharessh::share::keys::{build_http_client, fetch_keys};
use sharessh::share::server::serve;
use sharessh::share::{ServerConfig, ShareError};

/// Share a terminal over SSH with whoever holds the keys of a GitHub account.
#[derive(Debug, Parser)]
#[command(name = "sharessh", version, about)]
struct Cli {
    /// GitHub account whose published keys may connect
    account: String,

    /// Port to listen on [env: SHARESSH_PORT] [default: 2222]
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind [env: SHARESSH_BIND] [default: 0.0.0.0]
    #[arg(short, long)]
    bind: Option<String>,

    /// Shell to run for each session [env: SHARESSH_SHELL, then SHELL] [default: bash]
    #[arg(long)]
    shell: Option<String>,

    /// Base URL serving `<account>.keys` [env: SHARESSH_KEYS_URL]
    #[arg(long)]
    keys_url: Option<String>,

    /// OpenSSH private key to use as host key instead of a fresh one [env: SHARESSH_HOST_KEY]
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Skip the public IP lookup for the share command
    #[arg(long)]
    no_hint: bool,

    /// Enable debug logging [env: SHARESSH_DEBUG]
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let level = if resolve_debug(cli.debug) { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(level.parse().expect("valid directive")),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ShareError> {
    let config = ServerConfig {
        account: cli.account,
        bind_address: resolve_bind_address(cli.bind),
        port: resolve_port(cli.port),
        shell: resolve_shell(cli.shell),
        host_key: resolve_host_key(cli.host_key),
    };
    let keys_url = resolve_keys_url(cli.keys_url);

    let client = build_http_client()?;
    let keys = fetch_keys(&client, &keys_url, &config.account).await?;
    let github = GitHubKeys::new(config.account.clone(), keys);

    info!("Starting SSH server on port {}", config.port);
    info!("Sharing {} with @{}", config.shell, github.account());
    let authorizer: Arc<dyn KeyAuthorizer> = Arc::new(github);
    if !cli.no_hint {
        let command = share_hint(&client, IP_ECHO_URL, config.port).await;
        info!("Connect with: {}", command);
    }

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    serve(&config, authorizer, shutdown).await
}
