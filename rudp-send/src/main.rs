//! Command-line client: reads a file into memory, then runs the sender
//! FSM against a single peer.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rudp_core::config::SenderConfig;
use rudp_core::socket::RudpSocket;

/// Send a file to a rudp-recv server over UDP with Go-Back-N reliability.
#[derive(Parser, Debug)]
#[command(name = "rudp-send", about = "Reliable UDP file sender")]
struct Args {
    /// Destination host.
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Destination port.
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Path of the file to send.
    #[arg(long)]
    file: PathBuf,

    /// Payload bytes per DATA packet.
    #[arg(long, default_value_t = 1024)]
    chunk: usize,

    /// Go-Back-N window size, in packets.
    #[arg(long, default_value_t = 8)]
    window: u16,

    /// Retransmission timeout, in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 300)]
    timeout_ms: u64,

    /// Maximum retries before giving up a phase.
    #[arg(long = "max-retries", default_value_t = 20)]
    max_retries: u32,

    /// Optional TOML config file layered beneath these flags.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(args: &Args) -> SenderConfig {
    let mut config = args
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|text| toml::from_str::<SenderConfig>(&text).ok())
        .unwrap_or_default();

    config.host = args.host;
    config.port = args.port;
    config.chunk_size = args.chunk;
    config.window = args.window;
    config.timeout_ms = args.timeout_ms;
    config.max_retries = args.max_retries;
    config
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args);

    let data = match std::fs::read(&args.file) {
        Ok(data) => data,
        Err(err) => {
            tracing::error!(file = %args.file.display(), %err, "failed to read input file");
            return ExitCode::from(1);
        }
    };

    let filename = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "payload.bin".to_string());

    let bind_addr = SocketAddr::new(
        if config.host.is_ipv4() {
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        },
        0,
    );
    let socket = match RudpSocket::bind(bind_addr) {
        Ok(socket) => socket,
        Err(err) => {
            tracing::error!(%err, "failed to bind UDP socket");
            return ExitCode::from(1);
        }
    };

    let peer = SocketAddr::new(config.host, config.port);

    match rudp_core::sender::run(&socket, peer, &filename, &data, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "transfer failed");
            ExitCode::from(err.exit_code())
        }
    }
}
