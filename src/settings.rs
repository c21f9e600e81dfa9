use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use httptunnel::adapters::TcpProxyDialer;
use httptunnel::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub proxy_url: String,
    pub bind: String,
    pub dest: Option<String>,
    pub buffer_requests: bool,
    /// Zero keeps the library default.
    pub flush_timeout_ms: u64,
    /// Zero keeps the library default.
    pub idle_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: "http://127.0.0.1:8080".into(),
            bind: "127.0.0.1:8889".into(),
            dest: None,
            buffer_requests: false,
            flush_timeout_ms: 0,
            idle_timeout_ms: 0,
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self, confy::ConfyError> {
        match path {
            Some(path) => confy::load_path(path),
            None => confy::load("httptunnel", None),
        }
    }

    pub fn proxy_url(&self) -> Result<Url, url::ParseError> {
        self.proxy_url.parse()
    }

    pub fn tunnel_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let dialer = TcpProxyDialer::from_url(&self.proxy_url()?)?;
        Ok(Config::new(Arc::new(dialer))
            .with_buffering(self.buffer_requests)
            .with_flush_timeout(Duration::from_millis(self.flush_timeout_ms))
            .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms)))
    }
}
