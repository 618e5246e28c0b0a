//! Command-line server: binds a UDP socket and runs the multi-session
//! receiver FSM until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufWriter;
use tokio::sync::Notify;

use rudp_core::config::ReceiverConfig;
use rudp_core::receiver::session::OutputSink;
use rudp_core::receiver::OutputOpener;
use rudp_core::socket::RudpSocket;

/// Receive files sent over UDP with Go-Back-N reliability, one per
/// handshake, keyed by peer address.
#[derive(Parser, Debug)]
#[command(name = "rudp-recv", about = "Reliable UDP file receiver")]
struct Args {
    /// UDP port to listen on.
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Directory in which received files are written.
    #[arg(long, default_value = "./server_data")]
    outdir: PathBuf,

    /// Go-Back-N window size advertised in HANDSHAKE_ACK.
    #[arg(long, default_value_t = 8)]
    window: u16,

    /// Optional TOML config file layered beneath these flags.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> ReceiverConfig {
    let mut config = args
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|text| toml::from_str::<ReceiverConfig>(&text).ok())
        .unwrap_or_default();

    config.port = args.port;
    config.outdir = args.outdir.to_string_lossy().into_owned();
    config.window = args.window;
    config
}

/// Opens session sinks as buffered, truncating `tokio::fs::File`s.
struct FsOpener;

#[async_trait::async_trait]
impl OutputOpener for FsOpener {
    async fn open(&self, path: &str) -> std::io::Result<Box<dyn OutputSink>> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args);

    if let Err(err) = std::fs::create_dir_all(&config.outdir) {
        tracing::error!(outdir = %config.outdir, %err, "failed to create output directory");
        return std::process::ExitCode::from(1);
    }

    let socket = match RudpSocket::bind(bind_addr(config.port)) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(%err, "failed to bind UDP socket");
            return std::process::ExitCode::from(1);
        }
    };

    tracing::info!(port = config.port, outdir = %config.outdir, window = config.window, "rudp-recv listening");

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            shutdown_signal.notify_one();
        }
    });

    let opener = FsOpener;
    match rudp_core::receiver::run(&socket, &config, &opener, &shutdown).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "receiver terminated");
            std::process::ExitCode::from(1)
        }
    }
}

fn bind_addr(port: u16) -> std::net::SocketAddr {
    std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), port)
}
