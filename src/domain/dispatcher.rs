use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use super::models::{DispatchJob, HostWithResponse, Inbound, Op, PendingRequest, REDIAL_MARGIN};
use super::protocol::{build_request, ProxyConn, RoundTrip};
use super::{Result, TunnelError};
use crate::ports::{ProxyDialer, RequestFactory};

/// Request dispatch pipeline, the only task that talks to the proxy.
///
/// Round trips run one at a time: a write job or a read poll is taken only
/// after the previous exchange has completed. The task ends once the writer
/// has gone away.
pub(crate) struct Dispatcher {
    id: String,
    dest_addr: String,
    dest_host: String,
    proxy_host: Option<String>,
    seeded: bool,
    idle_timeout: Duration,
    dialer: Arc<dyn ProxyDialer>,
    factory: Arc<dyn RequestFactory>,
    proxy_conn: Option<ProxyConn>,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    jobs: mpsc::Receiver<DispatchJob>,
    poll: Arc<Notify>,
    inbound: mpsc::Sender<Inbound>,
}

pub(crate) struct DispatcherParts {
    pub id: String,
    pub dest_addr: String,
    pub dest_host: String,
    pub idle_timeout: Duration,
    pub dialer: Arc<dyn ProxyDialer>,
    pub factory: Arc<dyn RequestFactory>,
    pub local_addr: Arc<Mutex<Option<SocketAddr>>>,
    pub jobs: mpsc::Receiver<DispatchJob>,
    pub poll: Arc<Notify>,
    pub inbound: mpsc::Sender<Inbound>,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts, proxy_conn: ProxyConn) -> Self {
        *parts.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = proxy_conn.local_addr();
        Self {
            id: parts.id,
            dest_addr: parts.dest_addr,
            dest_host: parts.dest_host,
            proxy_host: None,
            seeded: false,
            idle_timeout: parts.idle_timeout,
            dialer: parts.dialer,
            factory: parts.factory,
            proxy_conn: Some(proxy_conn),
            local_addr: parts.local_addr,
            jobs: parts.jobs,
            poll: parts.poll,
            inbound: parts.inbound,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                job = self.jobs.recv() => match job {
                    Some(DispatchJob { request, finished }) => {
                        let res = self.process(Op::Write, &request).await;
                        let _ = finished.send(res);
                    }
                    None => break,
                },
                _ = self.poll.notified() => {
                    if let Err(e) = self.process(Op::Read, &PendingRequest::empty()).await {
                        let _ = self.inbound.send(Inbound::PollFailed(e)).await;
                    }
                }
            }
        }

        if let Some(proxy_conn) = self.proxy_conn.take() {
            proxy_conn.close();
        }
        debug!("[{}] Done requesting", self.id);
    }

    fn host(&self) -> &str {
        self.proxy_host.as_deref().unwrap_or(&self.dest_host)
    }

    async fn process(&mut self, op: Op, request: &PendingRequest) -> Result<()> {
        let RoundTrip { proxy_host, body, eof } = self.round_trip(op, request).await?;

        if !self.seeded {
            self.seeded = true;
            if let Some(proxy_host) = proxy_host {
                info!("[{}] Pinning {} to proxy host {}", self.id, self.dest_addr, proxy_host);
                self.proxy_host = Some(proxy_host);
            }
        }

        if op == Op::Read || eof || !body.is_empty() {
            let response = HostWithResponse {
                host: self.host().to_string(),
                body,
                eof,
            };
            let _ = self
                .inbound
                .send(Inbound::Response {
                    response,
                    poll: op == Op::Read,
                })
                .await;
        }
        Ok(())
    }

    async fn round_trip(&mut self, op: Op, request: &PendingRequest) -> Result<RoundTrip> {
        self.redial_if_necessary().await?;
        let req = build_request(
            self.factory.as_ref(),
            self.host(),
            op,
            &self.id,
            &self.dest_addr,
            request,
        )?;
        debug!("[{}] {} {} bytes for {}", self.id, op, request.length, self.dest_addr);

        let proxy_conn = self.proxy_conn.as_mut().ok_or(TunnelError::Closed)?;
        proxy_conn.round_trip(req).await
    }

    /// Replaces the proxy connection when it is closed or about to idle out.
    async fn redial_if_necessary(&mut self) -> Result<()> {
        let stale = match &self.proxy_conn {
            Some(proxy_conn) => proxy_conn.expire_if_stale(REDIAL_MARGIN),
            None => true,
        };
        if !stale {
            return Ok(());
        }

        if let Some(old) = self.proxy_conn.take() {
            debug!("[{}] Redialing proxy, old connection times out in {:?}", self.id, old.times_out_in());
            old.close();
        }

        let proxy_conn = ProxyConn::dial(self.dialer.as_ref(), &self.dest_addr, self.idle_timeout).await?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = proxy_conn.local_addr();
        self.proxy_conn = Some(proxy_conn);
        Ok(())
    }
}
