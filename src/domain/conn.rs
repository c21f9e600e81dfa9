use hyper::body::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::lookup_host;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::dispatcher::{Dispatcher, DispatcherParts};
use super::models::{ReadRequest, WriteCommand, WriteRequest};
use super::protocol::ProxyConn;
use super::reader::Reader;
use super::writer::Writer;
use super::{strategy, ActivityTracker, Config, Result, TunnelError};
use crate::idletiming::IdleTiming;

/// A byte stream to `dest_addr` carried over HTTP round trips to a proxy.
///
/// Cheap to clone; all clones drive the same tunnel.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
}

struct Shared {
    id: String,
    dest_addr: String,
    remote_addr: SocketAddr,
    local_addr: Arc<Mutex<Option<SocketAddr>>>,
    activity: Arc<ActivityTracker>,
    writes: mpsc::Sender<WriteCommand>,
    reads: mpsc::Sender<ReadRequest>,
    async_errors: Mutex<mpsc::Receiver<TunnelError>>,
    done_writing: watch::Sender<bool>,
    done_reading: watch::Sender<bool>,
    writer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    shut_down: watch::Sender<bool>,
}

/// Opens a tunnel to `addr` (`host:port`) through the proxy reached by
/// `config.dial_proxy`.
///
/// The returned connection closes itself once it has been idle for the
/// configured idle timeout.
pub async fn dial(addr: &str, mut config: Config) -> Result<IdleTiming<Conn>> {
    let remote_addr = lookup_host(addr)
        .await
        .map_err(|e| TunnelError::Resolution(format!("Unable to resolve TCP addr {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| TunnelError::Resolution(format!("No address found for {}", addr)))?;
    let dest_host = split_host(addr)?;

    config.init_defaults();
    let id = Uuid::new_v4().to_string();

    let (writes, writes_rx) = mpsc::channel(1);
    let (reads, reads_rx) = mpsc::channel(1);
    let (jobs, jobs_rx) = mpsc::channel(1);
    let (inbound, inbound_rx) = mpsc::channel(1);
    let (async_errors_tx, async_errors) = mpsc::channel(2);
    let (done_writing, done_writing_rx) = watch::channel(false);
    let (done_reading, done_reading_rx) = watch::channel(false);
    let poll = Arc::new(Notify::new());

    let activity = Arc::new(ActivityTracker::new(config.idle_timeout));
    activity.mark_active();

    let writer = Writer::new(
        id.clone(),
        writes_rx,
        strategy::for_config(config.buffer_requests, config.flush_timeout),
        jobs,
        async_errors_tx.clone(),
        done_writing_rx,
    );
    let reader = Reader::new(
        id.clone(),
        reads_rx,
        inbound_rx,
        poll.clone(),
        async_errors_tx,
        done_reading_rx,
    );
    let writer = tokio::spawn(writer.run());
    tokio::spawn(reader.run());

    let conn = Conn {
        shared: Arc::new(Shared {
            id: id.clone(),
            dest_addr: addr.to_string(),
            remote_addr,
            local_addr: Arc::new(Mutex::new(None)),
            activity: activity.clone(),
            writes,
            reads,
            async_errors: Mutex::new(async_errors),
            done_writing,
            done_reading,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            shut_down: watch::channel(false).0,
        }),
    };

    let proxy_conn = match ProxyConn::dial(config.dial_proxy.as_ref(), addr, config.idle_timeout).await {
        Ok(proxy_conn) => proxy_conn,
        Err(e) => {
            // Without a dispatcher the pipelines can never complete any work.
            drop((jobs_rx, inbound));
            conn.close().await?;
            return Err(e);
        }
    };

    let dispatcher = Dispatcher::new(
        DispatcherParts {
            id,
            dest_addr: addr.to_string(),
            dest_host,
            idle_timeout: config.idle_timeout,
            dialer: config.dial_proxy.clone(),
            factory: config.request_factory(),
            local_addr: conn.shared.local_addr.clone(),
            jobs: jobs_rx,
            poll,
            inbound,
        },
        proxy_conn,
    );
    tokio::spawn(dispatcher.run());

    info!("[{}] Tunnel to {} established", conn.id(), addr);

    let on_idle = conn.clone();
    Ok(IdleTiming::with_tracker(conn, activity, move || async move {
        debug!("[{}] Idle timeout reached, closing", on_idle.id());
        let _ = on_idle.close().await;
    }))
}

/// Extracts the host part of `host:port`, unbracketing IPv6 literals.
pub(crate) fn split_host(addr: &str) -> Result<String> {
    let (host, _port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TunnelError::InvalidAddress(format!("missing port in address {}", addr)))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| TunnelError::InvalidAddress(format!("missing ']' in address {}", addr)))?,
        None if host.contains(':') => {
            return Err(TunnelError::InvalidAddress(format!("too many colons in address {}", addr)));
        }
        None => host,
    };
    Ok(host.to_string())
}

impl Conn {
    /// Correlation identifier sent with every request of this tunnel.
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The `host:port` this tunnel reaches.
    pub fn dest_addr(&self) -> &str {
        &self.shared.dest_addr
    }

    /// Resolved address of the destination.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// Local address of the current proxy connection, when known.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_idle(&self) -> bool {
        self.shared.activity.is_idle()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Reads inbound bytes into `buf`. `Ok(0)` means the stream has ended.
    ///
    /// # Cancel safety
    ///
    /// Not cancel safe. Bytes already handed to a dropped read are lost.
    /// Inbound bytes that arrive while nobody reads are buffered without
    /// limit, so long-lived tunnels should keep a read outstanding.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_usable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let (reply, on_reply) = oneshot::channel();
        self.shared
            .reads
            .send(ReadRequest { max: buf.len(), reply })
            .await
            .map_err(|_| TunnelError::Closed)?;
        let data = on_reply.await.map_err(|_| TunnelError::Closed)??;

        buf[..data.len()].copy_from_slice(&data);
        self.shared.activity.mark_active();
        Ok(data.len())
    }

    /// Writes `buf` to the tunnel, returning once the active request
    /// strategy has accepted it.
    ///
    /// May write fewer bytes than `buf` holds when a large write fails part
    /// way; the failure is then returned by the next call.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.ensure_usable()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let (reply, on_reply) = oneshot::channel();
        let request = WriteRequest {
            data: Bytes::copy_from_slice(buf),
            reply,
        };
        self.shared
            .writes
            .send(WriteCommand::Write(request))
            .await
            .map_err(|_| TunnelError::Closed)?;
        let written = on_reply.await.map_err(|_| TunnelError::Closed)??;

        self.shared.activity.mark_active();
        Ok(written)
    }

    /// Sends any buffered bytes now instead of waiting for the flush timeout.
    pub async fn flush(&self) -> Result<()> {
        self.ensure_usable()?;
        let (reply, on_reply) = oneshot::channel();
        self.shared
            .writes
            .send(WriteCommand::Flush(reply))
            .await
            .map_err(|_| TunnelError::Closed)?;
        on_reply.await.map_err(|_| TunnelError::Closed)?
    }

    /// Flushes pending writes and stops the tunnel. Safe to call repeatedly;
    /// every call returns once the tunnel has stopped.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            let mut shut_down = self.shared.shut_down.subscribe();
            let _ = shut_down.wait_for(|done| *done).await;
            return Ok(());
        }
        debug!("[{}] Closing tunnel to {}", self.id(), self.dest_addr());

        let _ = self.shared.done_writing.send(true);
        let writer = self.shared.writer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                debug!("[{}] Writer ended abnormally: {}", self.id(), e);
            }
        }
        let _ = self.shared.done_reading.send(true);
        self.shared.shut_down.send_replace(true);
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TunnelError::Closed);
        }
        let mut async_errors = self.shared.async_errors.lock().unwrap_or_else(|e| e.into_inner());
        match async_errors.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.shared.id)
            .field("dest_addr", &self.shared.dest_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}
