use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info};

use breakwater_core::config::Config;
use breakwater_core::session::{SessionConfig, SessionDriver};
use breakwater_core::telemetry::{self, LogConfig, LogLevel};
use breakwater_core::term::AlacrittyEmulator;
use breakwater_core::transport::websocket::WebSocketRelay;

#[derive(Parser, Debug)]
#[command(name = "breakwater", about = "Session-reconstructing WebSocket proxy for a text BBS")]
struct Cli {
    /// Local listen address (overrides BREAKWATER_LISTEN)
    #[arg(long)]
    listen: Option<String>,

    /// Upstream WebSocket URL (overrides BREAKWATER_UPSTREAM)
    #[arg(long)]
    upstream: Option<String>,

    /// Archivist socket path (overrides BREAKWATER_ARCHIVE_SOCK)
    #[arg(long)]
    archive_sock: Option<PathBuf>,

    /// Skip the reader-setup bootstrap macro on new sessions
    #[arg(long)]
    no_bootstrap: bool,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let mut config = Config::from_env();
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(upstream) = cli.upstream {
        config.upstream = upstream;
    }
    if let Some(sock) = cli.archive_sock {
        config.archive_sock = sock;
    }

    let relay = WebSocketRelay::bind(&config.listen, &config.upstream).await?;

    // SIGUSR1 asks every live session to dump its state
    let (dump_tx, _) = broadcast::channel::<()>(4);
    {
        let dump_tx = dump_tx.clone();
        let mut signal =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())?;
        tokio::spawn(async move {
            while signal.recv().await.is_some() {
                info!(target: "breakwater", "dump requested");
                let _ = dump_tx.send(());
            }
        });
    }

    loop {
        match relay.accept().await {
            Ok(relayed) => {
                let session_config = SessionConfig {
                    archive_sock: config.archive_sock.clone(),
                    run_bootstrap: !cli.no_bootstrap,
                    ..SessionConfig::default()
                };
                let dump_rx = dump_tx.subscribe();
                tokio::spawn(async move {
                    let emulator =
                        AlacrittyEmulator::new(session_config.columns, session_config.rows);
                    let driver =
                        SessionDriver::new(Box::new(emulator), relayed.flow.clone(), session_config);
                    driver.run(relayed.events, dump_rx).await;
                });
            }
            Err(err) => {
                error!(target: "breakwater", %err, "accept failed");
            }
        }
    }
}
