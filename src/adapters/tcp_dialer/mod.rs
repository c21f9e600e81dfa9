use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::ports::{ProxyDialer, ProxyStream};

/// Dials the proxy over plain TCP.
#[derive(Debug, Clone)]
pub struct TcpProxyDialer {
    proxy_addr: String,
    connect_timeout: Duration,
}

impl TcpProxyDialer {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new<T>(proxy_addr: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            proxy_addr: proxy_addr.into(),
            connect_timeout: Self::CONNECT_TIMEOUT,
        }
    }

    /// Build a dialer from a proxy URL such as `http://proxy.example.net:8080`.
    pub fn from_url(proxy_url: &Url) -> io::Result<Self> {
        let host = proxy_url.host_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("missing host in proxy URL {}", proxy_url))
        })?;
        let port = proxy_url.port_or_known_default().unwrap_or(80);
        Ok(Self::new(format!("{}:{}", host, port)))
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }
}

#[async_trait]
impl ProxyDialer for TcpProxyDialer {
    async fn dial(&self, dest_addr: &str) -> io::Result<Box<dyn ProxyStream>> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.proxy_addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                log::debug!("Connected to proxy {} for {}", self.proxy_addr, dest_addr);
                Ok(Box::new(stream))
            }
            Ok(Err(e)) => {
                log::debug!("Failed to connect to proxy {}: {}", self.proxy_addr, e);
                Err(e)
            }
            Err(_) => {
                log::debug!("Timeout connecting to proxy {}", self.proxy_addr);
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("timed out connecting to proxy {}", self.proxy_addr),
                ))
            }
        }
    }
}
