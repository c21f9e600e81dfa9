use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A raw byte stream to the proxy, before any HTTP framing.
pub trait ProxyStream: AsyncRead + AsyncWrite + Send + Unpin {
    /// Local address of the stream, when it has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

impl ProxyStream for TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        TcpStream::local_addr(self).ok()
    }
}

impl ProxyStream for tokio::io::DuplexStream {}

/// Port for opening physical connections to the proxy
#[async_trait]
pub trait ProxyDialer: Send + Sync {
    /// Open a new connection to the proxy on behalf of a tunnel to `dest_addr`
    async fn dial(&self, dest_addr: &str) -> io::Result<Box<dyn ProxyStream>>;
}
