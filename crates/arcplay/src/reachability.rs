//! Network reachability check used before starting remote playback.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
pub trait Reachability: Send + Sync + 'static {
    async fn is_online(&self) -> bool;
}

/// Probes a TCP connection to the archive host.
pub struct NetworkProbe {
    address: String,
    timeout: Duration,
}

impl NetworkProbe {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Derive `host:port` from the configured archive base URL.
    pub fn for_base_url(base_url: &str) -> Self {
        let address = url::Url::parse(base_url)
            .ok()
            .and_then(|u| {
                let host = u.host_str()?.to_string();
                let port = u.port_or_known_default()?;
                Some(format!("{}:{}", host, port))
            })
            .unwrap_or_else(|| "archive.org:443".to_string());
        Self::new(address, Duration::from_secs(3))
    }
}

#[async_trait]
impl Reachability for NetworkProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("reachability: connect {} failed: {}", self.address, e);
                false
            }
            Err(_) => {
                debug!("reachability: connect {} timed out", self.address);
                false
            }
        }
    }
}
