use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use super::ProxyFlow;

/// In-memory flow that records everything injected through it.
#[derive(Default)]
pub struct MockFlow {
    pub to_server: Mutex<Vec<Vec<u8>>>,
    pub to_client: Mutex<Vec<Vec<u8>>>,
}

impl MockFlow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_bytes(&self) -> Vec<u8> {
        self.to_server.lock().unwrap().concat()
    }

    pub fn client_bytes(&self) -> Vec<u8> {
        self.to_client.lock().unwrap().concat()
    }

    pub fn clear(&self) {
        self.to_server.lock().unwrap().clear();
        self.to_client.lock().unwrap().clear();
    }
}

#[async_trait]
impl ProxyFlow for MockFlow {
    async fn send_to_server(&self, bytes: &[u8]) -> Result<()> {
        self.to_server.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    async fn send_to_client(&self, bytes: &[u8]) -> Result<()> {
        self.to_client.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}
