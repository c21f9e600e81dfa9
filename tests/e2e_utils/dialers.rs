#![cfg(test)]
#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;

use httptunnel::ports::{ProxyDialer, ProxyStream};

/// Proxy that swallows every request and never answers.
#[derive(Debug, Default)]
pub struct StalledProxyDialer {
    dials: AtomicUsize,
}

impl StalledProxyDialer {
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyDialer for StalledProxyDialer {
    async fn dial(&self, _dest_addr: &str) -> io::Result<Box<dyn ProxyStream>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            while let Ok(n) = server.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        });
        Ok(Box::new(client))
    }
}

/// Dialer whose every attempt is refused.
#[derive(Debug, Default)]
pub struct RefusingDialer {
    attempts: AtomicUsize,
}

impl RefusingDialer {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyDialer for RefusingDialer {
    async fn dial(&self, _dest_addr: &str) -> io::Result<Box<dyn ProxyStream>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "proxy refused"))
    }
}
