mod store;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{error, info, warn};

use breakwater_archive::{decode_thread_record, read_frame, FRAME_TYPE_THREAD};

use store::ArchiveStore;

#[derive(Parser, Debug)]
#[command(name = "breakwater-archivist", about = "Thread archive persistence service")]
struct Cli {
    /// Unix socket to serve on
    #[arg(long, env = "BREAKWATER_ARCHIVE_SOCK", default_value = "/tmp/.breakwater_archivist")]
    sock: PathBuf,

    /// Root directory of the archive
    #[arg(long, env = "BREAKWATER_ARCHIVE_DIR", default_value = "archive")]
    dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let store = ArchiveStore::new(&cli.dir);

    let _ = std::fs::remove_file(&cli.sock);
    let listener = UnixListener::bind(&cli.sock)
        .with_context(|| format!("bind {}", cli.sock.display()))?;
    info!(sock = %cli.sock.display(), dir = %cli.dir.display(), "archivist listening");

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((conn, _)) => {
                    let store = store.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_connection(conn, store).await {
                            warn!(%err, "connection failed");
                        }
                    });
                }
                Err(err) => error!(%err, "accept failed"),
            },
            _ = sigterm.recv() => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("archivist shutting down");
    let _ = std::fs::remove_file(&cli.sock);
    Ok(())
}

async fn serve_connection(mut conn: tokio::net::UnixStream, store: ArchiveStore) -> anyhow::Result<()> {
    while let Some(frame) = read_frame(&mut conn).await? {
        match frame.frame_type {
            FRAME_TYPE_THREAD => match decode_thread_record(&frame.payload) {
                Ok(record) => {
                    if let Err(err) = store.merge(record).await {
                        warn!(%err, "merge failed");
                    }
                }
                Err(err) => warn!(%err, "undecodable record"),
            },
            other => warn!(frame_type = other, "unknown frame type"),
        }
    }
    Ok(())
}
