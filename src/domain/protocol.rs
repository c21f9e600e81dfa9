use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::debug;

use super::models::*;
use super::{ActivityTracker, Result, TunnelError};
use crate::idletiming::IdleTiming;
use crate::ports::{ProxyDialer, RequestFactory};

/// One physical connection to the proxy, driven by hyper's HTTP/1 client.
pub(crate) struct ProxyConn {
    sender: http1::SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    liveness: Arc<Mutex<Liveness>>,
    activity: Arc<ActivityTracker>,
    local_addr: Option<SocketAddr>,
}

/// Body and metadata of a successful round trip.
#[derive(Debug)]
pub(crate) struct RoundTrip {
    pub proxy_host: Option<String>,
    pub body: Bytes,
    pub eof: bool,
}

/// Closed flag shared with the idle watchdog, which also tears down the driver.
#[derive(Default)]
struct Liveness {
    closed: bool,
    driver: Option<AbortHandle>,
}

fn mark_closed(liveness: &Mutex<Liveness>) {
    liveness.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
}

fn expire(liveness: &Mutex<Liveness>) {
    let mut liveness = liveness.lock().unwrap_or_else(|e| e.into_inner());
    liveness.closed = true;
    if let Some(driver) = liveness.driver.take() {
        driver.abort();
    }
}

impl ProxyConn {
    pub async fn dial(dialer: &dyn ProxyDialer, dest_addr: &str, idle_timeout: Duration) -> Result<Self> {
        let stream = dialer
            .dial(dest_addr)
            .await
            .map_err(|e| TunnelError::ProxyDial(format!("{}", e)))?;
        let local_addr = stream.local_addr();

        let liveness = Arc::new(Mutex::new(Liveness::default()));
        let on_idle = liveness.clone();
        let stream = IdleTiming::wrap(stream, idle_timeout, move || {
            expire(&on_idle);
            futures::future::ready(())
        });
        let activity = stream.activity().clone();

        let (sender, conn) = http1::Builder::new()
            .title_case_headers(true)
            .handshake(TokioIo::new(stream))
            .await
            .map_err(|e| TunnelError::ProxyDial(format!("{}", e)))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Proxy connection terminated: {}", e);
            }
        });
        liveness.lock().unwrap_or_else(|e| e.into_inner()).driver = Some(driver.abort_handle());

        Ok(Self {
            sender,
            driver,
            liveness,
            activity,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn times_out_in(&self) -> Duration {
        self.activity.times_out_in()
    }

    /// Marks the connection closed if it already is, or if it would idle out
    /// within `margin`. Returns whether it must be replaced.
    pub fn expire_if_stale(&self, margin: Duration) -> bool {
        let mut liveness = self.liveness.lock().unwrap_or_else(|e| e.into_inner());
        if liveness.closed || self.activity.times_out_in() < margin {
            liveness.closed = true;
        }
        liveness.closed
    }

    pub fn close(&self) {
        mark_closed(&self.liveness);
        self.driver.abort();
    }

    /// Executes one tunnel round trip on this connection.
    pub async fn round_trip(&mut self, request: Request<Full<Bytes>>) -> Result<RoundTrip> {
        let res = self.send(request).await;
        if let Err(e) = &res {
            if e.is_transport() {
                mark_closed(&self.liveness);
            }
        }
        res
    }

    async fn send(&mut self, request: Request<Full<Bytes>>) -> Result<RoundTrip> {
        self.sender
            .ready()
            .await
            .map_err(|e| TunnelError::RequestWrite(format!("{}", e)))?;

        let response = self.sender.send_request(request).await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            // Drain so the connection stays usable for the next round trip.
            let _ = response.into_body().collect().await;
            return Err(TunnelError::ProxyStatus(status));
        }

        let proxy_host = response
            .headers()
            .get(X_ENPROXY_PROXY_HOST)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let eof = response
            .headers()
            .get(X_ENPROXY_EOF)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TunnelError::ResponseRead(format!("{}", e)))?
            .to_bytes();

        Ok(RoundTrip { proxy_host, body, eof })
    }
}

impl Drop for ProxyConn {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn classify(err: hyper::Error) -> TunnelError {
    if err.is_parse() || err.is_incomplete_message() {
        TunnelError::ResponseRead(format!("{}", err))
    } else {
        TunnelError::RequestWrite(format!("{}", err))
    }
}

/// Builds the outbound request of one round trip, tunnel headers included.
pub(crate) fn build_request(
    factory: &dyn RequestFactory,
    host: &str,
    op: Op,
    id: &str,
    dest_addr: &str,
    request: &PendingRequest,
) -> Result<Request<Full<Bytes>>> {
    let mut req = factory.new_request(host, Method::POST, request.body.clone())?;

    let header_value =
        |value: &str| HeaderValue::from_str(value).map_err(|e| TunnelError::RequestConstruction(format!("{}", e)));

    let headers = req.headers_mut();
    headers.insert(HeaderName::from_static(X_ENPROXY_OP), HeaderValue::from_static(op.as_str()));
    headers.insert(HeaderName::from_static(X_ENPROXY_ID), header_value(id)?);
    headers.insert(HeaderName::from_static(X_ENPROXY_DEST_ADDR), header_value(dest_addr)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
    // Some CDNs reject chunked request bodies, so the length is always explicit.
    headers.remove(TRANSFER_ENCODING);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(request.length));

    Ok(req)
}
