use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::transport::ProxyFlow;

/// Serializes synthetic server-bound bytes with a minimum inter-send spacing;
/// each item waits for its write to be acknowledged or abandoned on timeout.
/// Genuine client traffic does not pass through here.
pub struct PacingQueue {
    tx: mpsc::Sender<Vec<u8>>,
    task: JoinHandle<()>,
}

impl PacingQueue {
    pub fn start(flow: Arc<dyn ProxyFlow>, spacing: Duration, ack_timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        let task = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                match tokio::time::timeout(ack_timeout, flow.send_to_server(&bytes)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(target: "breakwater::session", %err, "paced send failed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "breakwater::session", "paced send unacknowledged");
                    }
                }
                tokio::time::sleep(spacing).await;
            }
        });
        Self { tx, task }
    }

    pub fn sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.tx.clone()
    }

    /// Tear down with the owning session; the queue never outlives it.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockFlow;

    #[tokio::test(start_paused = true)]
    async fn items_are_spaced_and_ordered() {
        let flow = Arc::new(MockFlow::new());
        let queue = PacingQueue::start(
            flow.clone(),
            Duration::from_millis(250),
            Duration::from_secs(1),
        );

        let started = tokio::time::Instant::now();
        let tx = queue.sender();
        tx.send(b"a".to_vec()).await.unwrap();
        tx.send(b"b".to_vec()).await.unwrap();
        tx.send(b"c".to_vec()).await.unwrap();
        queue.shutdown().await;

        assert_eq!(flow.server_bytes(), b"abc");
        // two full spacing gaps separate the three sends
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
