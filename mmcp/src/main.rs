use clap::{Args, Parser, Subcommand};
use mockmcp::mcp::{McpService, MockToolbox};
use mockmcp::server::{MockServer, ServerConfig};
use mockmcp::streaming::RegistryConfig;
use mockmcp_jsonrpc::{HttpTransportConfig, JsonRpcServer, StdioTransport};
use std::net::{IpAddr, SocketAddr};
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::*;
use tracing_subscriber::{filter::LevelFilter, EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    globals: Globals,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Globals {
    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mock server over HTTP: JSON-RPC on /mcp, streaming on /ws, health on /health
    ///
    /// Stops gracefully on Ctrl-C.
    Serve(ServeArgs),

    /// Serve JSON-RPC on stdin and respond on stdout, one message per line.
    /// Log events are written to stderr
    Stdio,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "MOCKMCP_HOST", default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, env = "MOCKMCP_PORT", default_value_t = 3000)]
    port: u16,

    /// Seconds between keep-alive comments on idle SSE channels
    #[arg(long, env = "MOCKMCP_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Unread events one streaming client may have before further events are dropped
    #[arg(long, env = "MOCKMCP_MAX_PENDING", default_value_t = 256)]
    max_pending: usize,

    /// Seed for the generated data, for reproducible runs
    #[arg(long, env = "MOCKMCP_SEED")]
    seed: Option<u64>,

    /// Milliseconds open connections get to finish on shutdown
    #[arg(long, env = "MOCKMCP_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    shutdown_grace_ms: u64,

    /// Milliseconds stream tasks get to exit after connections are closed
    #[arg(long, env = "MOCKMCP_TASK_DRAIN_MS", default_value_t = 1000)]
    task_drain_ms: u64,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        ServerConfig {
            bind: SocketAddr::new(args.host, args.port),
            http: HttpTransportConfig {
                heartbeat_interval: Duration::from_secs(args.heartbeat_secs.max(1)),
            },
            registry: RegistryConfig {
                outbound_capacity: args.max_pending,
                seed: args.seed,
            },
            shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
            task_drain: Duration::from_millis(args.task_drain_ms),
        }
    }
}

impl Commands {
    async fn execute(self, _globals: &Globals) -> anyhow::Result<()> {
        use Commands::*;
        match self {
            Serve(args) => {
                let server = MockServer::new(args.into());
                server.run(ctrl_c()).await?;
            }
            Stdio => {
                let server = JsonRpcServer::new(McpService::new(Arc::new(MockToolbox::default())));
                let cancel = CancellationToken::new();
                tokio::spawn({
                    let cancel = cancel.clone();
                    async move {
                        ctrl_c().await;
                        cancel.cancel();
                    }
                });

                info!("Listening on stdin");
                StdioTransport::new(server).serve(cancel).await?;
            }
        }

        Ok(())
    }
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C detected"),
        Err(e) => {
            // Without a signal handler the process can only be killed, so keep running
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await
        }
    }
}

/// Make any panic fatal.  tokio catches panics in spawned tasks, which would otherwise leave the
/// server running with a dead session or stream and nothing but a line on stderr to show for it.
fn install_panic_hook(terminate: fn(i32)) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!(panic = %info, "Panicked; terminating");
        default_hook(info);
        terminate(101);
    }));
}

fn terminate(code: i32) {
    exit(code)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let default_log_directive = match cli.globals.debug {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    // Log to stderr so that stdout stays free for the stdio transport
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_log_directive.into())
                .from_env_lossy(),
        )
        .json()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
    install_panic_hook(terminate);

    if let Err(e) = cli.command.execute(&cli.globals).await {
        error!("{:#}", e);
        exit(1);
    } else {
        debug!("command executed successfully");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    /// Verify that there aren't any invalid attributes in the CLI specification that can only be
    /// detected at runtime
    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    static TERMINATED_WITH: AtomicI32 = AtomicI32::new(0);

    fn record_termination(code: i32) {
        TERMINATED_WITH.store(code, Ordering::SeqCst);
    }

    #[test]
    fn panics_in_any_thread_terminate_the_process() {
        install_panic_hook(record_termination);
        let result = std::thread::spawn(|| panic!("stream task blew up")).join();
        drop(std::panic::take_hook());

        assert!(result.is_err());
        assert_eq!(TERMINATED_WITH.load(Ordering::SeqCst), 101);
    }

    #[test]
    fn serve_args_map_onto_server_config() {
        let cli = Cli::try_parse_from([
            "mmcp", "serve", "--host", "0.0.0.0", "--port", "8080", "--seed", "7",
            "--heartbeat-secs", "5", "--max-pending", "16",
        ])
        .unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve");
        };

        let config = ServerConfig::from(args);
        assert_eq!(config.bind, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.http.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.registry.outbound_capacity, 16);
        assert_eq!(config.registry.seed, Some(7));
        assert_eq!(config.shutdown_grace, Duration::from_secs(2));
        assert_eq!(config.task_drain, Duration::from_secs(1));
    }
}
