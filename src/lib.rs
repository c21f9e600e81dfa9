//! Client side of an HTTP tunnel: a byte stream to `host:port` carried as a
//! sequence of short HTTP round trips through an intermediary proxy.
//!
//! ```no_run
//! use std::sync::Arc;
//! use httptunnel::adapters::TcpProxyDialer;
//! use httptunnel::domain::{dial, Config};
//!
//! # async fn run() -> httptunnel::domain::Result<()> {
//! let config = Config::new(Arc::new(TcpProxyDialer::new("127.0.0.1:8080")));
//! let conn = dial("example.com:80", config).await?;
//! conn.write(b"GET / HTTP/1.0\r\n\r\n").await?;
//! let mut buf = [0u8; 1024];
//! let n = conn.read(&mut buf).await?;
//! conn.close().await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod idletiming;
pub mod ports;

pub use domain::{dial, Config, Conn, TunnelError};
pub use idletiming::IdleTiming;
