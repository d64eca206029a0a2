use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{FlowEvent, ProxyFlow};

/// Relays one local WebSocket client to the upstream service, handing every
/// byte to a session as it passes. TLS toward the upstream is the WebSocket
/// stack's business; interception happens upstream of this adapter.
pub struct WebSocketRelay {
    listener: TcpListener,
    upstream: String,
}

/// A session attached to one relayed connection.
pub struct RelayedSession {
    pub events: mpsc::Receiver<FlowEvent>,
    pub flow: Arc<dyn ProxyFlow>,
}

struct RelayFlow {
    to_server: mpsc::Sender<Vec<u8>>,
    to_client: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl ProxyFlow for RelayFlow {
    async fn send_to_server(&self, bytes: &[u8]) -> Result<()> {
        self.to_server
            .send(bytes.to_vec())
            .await
            .context("server writer gone")
    }

    async fn send_to_client(&self, bytes: &[u8]) -> Result<()> {
        self.to_client
            .send(bytes.to_vec())
            .await
            .context("client writer gone")
    }
}

impl WebSocketRelay {
    pub async fn bind(listen: &str, upstream: &str) -> Result<Self> {
        let parsed = url::Url::parse(upstream).with_context(|| format!("upstream {upstream}"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            anyhow::bail!("upstream must be a ws:// or wss:// url, got {upstream}");
        }
        let listener = TcpListener::bind(listen)
            .await
            .with_context(|| format!("bind {listen}"))?;
        info!(target: "breakwater::transport", listen, upstream, "relay listening");
        Ok(Self {
            listener,
            upstream: upstream.to_string(),
        })
    }

    /// Accept the next client and splice it to the upstream. Returns the
    /// session half; the pump tasks die with the connection.
    pub async fn accept(&self) -> Result<RelayedSession> {
        let (stream, peer) = self.listener.accept().await?;
        info!(target: "breakwater::transport", %peer, "client connected");
        self.splice(stream).await
    }

    async fn splice(&self, stream: TcpStream) -> Result<RelayedSession> {
        let client_ws = accept_async(stream).await.context("client handshake")?;
        let (upstream_ws, _) = connect_async(self.upstream.as_str())
            .await
            .with_context(|| format!("connect upstream {}", self.upstream))?;

        let (mut client_sink, mut client_read) = client_ws.split();
        let (mut server_sink, mut server_read) = upstream_ws.split();

        let (event_tx, events) = mpsc::channel::<FlowEvent>(64);
        let (to_server_tx, mut to_server_rx) = mpsc::channel::<Vec<u8>>(64);
        let (to_client_tx, mut to_client_rx) = mpsc::channel::<Vec<u8>>(64);

        // client -> session
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = client_read.next().await {
                match msg {
                    Ok(Message::Binary(bytes)) => {
                        if tx.send(FlowEvent::ClientBytes(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Text(text)) => {
                        if tx
                            .send(FlowEvent::ClientBytes(text.as_bytes().to_vec()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = tx.send(FlowEvent::Closed).await;
            debug!(target: "breakwater::transport", "client reader finished");
        });

        // upstream -> session
        let tx = event_tx;
        tokio::spawn(async move {
            while let Some(msg) = server_read.next().await {
                match msg {
                    Ok(Message::Binary(bytes)) => {
                        if tx.send(FlowEvent::ServerBytes(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            let _ = tx.send(FlowEvent::Closed).await;
            debug!(target: "breakwater::transport", "upstream reader finished");
        });

        // session -> upstream
        tokio::spawn(async move {
            while let Some(bytes) = to_server_rx.recv().await {
                if let Err(err) = server_sink.send(Message::Binary(bytes.into())).await {
                    warn!(target: "breakwater::transport", %err, "upstream write failed");
                    break;
                }
            }
        });

        // session -> client
        tokio::spawn(async move {
            while let Some(bytes) = to_client_rx.recv().await {
                if let Err(err) = client_sink.send(Message::Binary(bytes.into())).await {
                    warn!(target: "breakwater::transport", %err, "client write failed");
                    break;
                }
            }
        });

        Ok(RelayedSession {
            events,
            flow: Arc::new(RelayFlow {
                to_server: to_server_tx,
                to_client: to_client_tx,
            }),
        })
    }
}
