use std::sync::Arc;
use std::time::Duration;

use super::models::{DEFAULT_FLUSH_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
use crate::adapters::DefaultRequestFactory;
use crate::ports::{ProxyDialer, RequestFactory};

/// Configuration of a tunnel connection.
///
/// Zero durations and a missing request factory are replaced by defaults
/// when the connection is dialed.
#[derive(Clone)]
pub struct Config {
    /// How long the buffering strategy may hold written bytes before sending them
    pub flush_timeout: Duration,
    /// Idle timeout of the tunnel connection and of each proxy connection
    pub idle_timeout: Duration,
    /// Override for building the outbound request of each round trip
    pub new_request: Option<Arc<dyn RequestFactory>>,
    /// Buffer writes into larger requests instead of streaming each write
    pub buffer_requests: bool,
    /// Opens physical connections to the proxy
    pub dial_proxy: Arc<dyn ProxyDialer>,
}

impl Config {
    pub fn new(dial_proxy: Arc<dyn ProxyDialer>) -> Self {
        Self {
            flush_timeout: Duration::ZERO,
            idle_timeout: Duration::ZERO,
            new_request: None,
            buffer_requests: false,
            dial_proxy,
        }
    }

    pub fn with_flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_buffering(mut self, buffer_requests: bool) -> Self {
        self.buffer_requests = buffer_requests;
        self
    }

    pub fn with_request_factory(mut self, new_request: Arc<dyn RequestFactory>) -> Self {
        self.new_request = Some(new_request);
        self
    }

    pub(crate) fn init_defaults(&mut self) {
        if self.flush_timeout.is_zero() {
            self.flush_timeout = DEFAULT_FLUSH_TIMEOUT;
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = DEFAULT_IDLE_TIMEOUT;
        }
        if self.new_request.is_none() {
            self.new_request = Some(Arc::new(DefaultRequestFactory));
        }
    }

    pub(crate) fn request_factory(&self) -> Arc<dyn RequestFactory> {
        self.new_request
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultRequestFactory))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("flush_timeout", &self.flush_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("custom_request", &self.new_request.is_some())
            .field("buffer_requests", &self.buffer_requests)
            .finish()
    }
}
