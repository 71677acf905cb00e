use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, Subcommand};
use poem::{listener::TcpListener, Endpoint, EndpointExt as _, Route};
use poem_openapi::OpenApiService;
use tracing_subscriber::{fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use crate::{
    api::{Api, Config},
    reporter::ErrorReporter,
};

mod api;
mod provider;
mod reporter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serves the storage roots API.
    Serve {
        /// Bind to the provided socket
        #[arg(short, long, value_name = "SOCKET", default_value = "0.0.0.0:37283")]
        bind: SocketAddr,

        /// JSON-RPC endpoint of an archive node.
        #[arg(short, long, value_name = "URL", env = "RPC_MAINNET")]
        rpc: String,

        /// Error tracking endpoint receiving the captured errors.
        #[arg(long, value_name = "URL", env = "ERROR_REPORT_URL")]
        report_url: Option<String>,

        /// Upper bound of an error report flush, in milliseconds.
        #[arg(long, value_name = "MS", default_value = "2000")]
        flush_timeout: u64,
    },

    /// Builds the proof bundle of a single block and prints the response.
    Bundle {
        /// Hash of the block to prove.
        #[arg(long, value_name = "HASH")]
        blockhash: String,

        /// JSON-RPC endpoint of an archive node.
        #[arg(short, long, value_name = "URL", env = "RPC_MAINNET")]
        rpc: String,

        /// Error tracking endpoint receiving the captured errors.
        #[arg(long, value_name = "URL", env = "ERROR_REPORT_URL")]
        report_url: Option<String>,

        /// Upper bound of an error report flush, in milliseconds.
        #[arg(long, value_name = "MS", default_value = "2000")]
        flush_timeout: u64,
    },
}

fn app(bind: &str, config: Config, reporter: Arc<ErrorReporter>) -> impl Endpoint {
    let api_service = OpenApiService::new(Api, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        .server(format!("{bind}/api"));
    let ui = api_service.swagger_ui();

    Route::new()
        .nest("/", ui)
        .nest("/api", api_service)
        .data(config)
        .data(reporter)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    match Cli::parse().cmd {
        Command::Serve {
            bind,
            rpc,
            report_url,
            flush_timeout,
        } => {
            let config = Config::new(rpc, flush_timeout);
            let reporter = Arc::new(ErrorReporter::new(report_url));

            tracing::info!("Monitoring {} accounts...", config.targets.accounts.len());

            let app = app(&bind.to_string(), config, reporter);

            tracing::info!("API loaded, listening on `{}`...", &bind);

            poem::Server::new(TcpListener::bind(&bind)).run(app).await?;
        }

        Command::Bundle {
            blockhash,
            rpc,
            report_url,
            flush_timeout,
        } => {
            let config = Config::new(rpc, flush_timeout);
            let reporter = ErrorReporter::new(report_url);
            let roots = config.storage_roots();

            let response = storage_roots::handle(
                &roots,
                &reporter,
                Some(&blockhash),
                config.flush_timeout(),
            )
            .await;

            println!("{}", serde_json::to_string_pretty(&response)?);

            if !response.is_ok() {
                anyhow::bail!("proof bundle of block `{blockhash}` failed");
            }
        }
    }

    Ok(())
}

/// Serves `endpoint` on a free local port, returning its url.
#[cfg(test)]
async fn spawn_mock<E>(endpoint: E) -> String
where
    E: Endpoint + 'static,
{
    use poem::listener::{Acceptor as _, TcpAcceptor};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let acceptor = TcpAcceptor::from_tokio(listener).unwrap();
    let url = acceptor
        .local_addr()
        .into_iter()
        .find_map(|a| a.as_socket_addr().copied())
        .map(|a| format!("http://{a}"))
        .unwrap();

    tokio::spawn(poem::Server::new_with_acceptor(acceptor).run(endpoint));

    url
}

#[test]
fn cli_parses_subcommands() {
    let cli = Cli::try_parse_from([
        "storage-roots-service",
        "serve",
        "--rpc",
        "http://localhost:8545",
    ])
    .unwrap();

    match cli.cmd {
        Command::Serve {
            bind,
            rpc,
            flush_timeout,
            ..
        } => {
            assert_eq!(bind.port(), 37283);
            assert_eq!(rpc, "http://localhost:8545");
            assert_eq!(flush_timeout, 2000);
        }
        Command::Bundle { .. } => panic!("expected the serve command"),
    }

    let cli = Cli::try_parse_from([
        "storage-roots-service",
        "bundle",
        "--blockhash",
        "0x8bac7f1a6ed2325a0998f21bd56ca812fbf2e15cbe105bccdf4d4d81177ce984",
        "--rpc",
        "http://localhost:8545",
        "--flush-timeout",
        "100",
    ])
    .unwrap();

    assert!(matches!(
        cli.cmd,
        Command::Bundle {
            flush_timeout: 100,
            ..
        }
    ));
}
