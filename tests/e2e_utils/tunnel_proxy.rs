#![cfg(test)]
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ServerBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use httptunnel::adapters::TcpProxyDialer;
use httptunnel::Config;

/// One tunnel request as seen by the proxy.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub op: String,
    pub id: String,
    pub dest: String,
    pub host: String,
    pub path: String,
    pub content_length: Option<usize>,
    pub transfer_encoding: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub connection: usize,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    /// Answer every request with this status
    pub status: Option<StatusCode>,
    /// Return write bodies in the write response instead of queueing them for reads
    pub echo_in_write_response: bool,
    /// Mark read responses with EOF once the queue is empty
    pub eof_on_read: bool,
    /// Advertised sticky host
    pub proxy_host: Option<String>,
    /// How long a read poll waits for queued bytes
    pub read_wait: Duration,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            status: None,
            echo_in_write_response: false,
            eof_on_read: false,
            proxy_host: None,
            read_wait: Duration::from_millis(50),
        }
    }
}

struct ProxyState {
    options: ProxyOptions,
    requests: Mutex<Vec<RecordedRequest>>,
    queues: Mutex<HashMap<String, Vec<u8>>>,
    connections: AtomicUsize,
}

/// Minimal tunnel proxy echoing written bytes back to the same connection id.
pub struct TestTunnelProxy {
    addr: SocketAddr,
    state: Arc<ProxyState>,
    _handle: JoinHandle<()>,
}

impl TestTunnelProxy {
    pub async fn start(options: ProxyOptions) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ProxyState {
            options,
            requests: Mutex::new(Vec::new()),
            queues: Mutex::new(HashMap::new()),
            connections: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let connection = accept_state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let state = accept_state.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(state.clone(), connection, req));
                    if let Err(_err) = ServerBuilder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        // Clients drop proxy connections on redial
                    }
                });
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> Config {
        Config::new(Arc::new(TcpProxyDialer::new(self.addr.to_string())))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.op == "write").collect()
    }

    pub fn written_bytes(&self) -> Vec<u8> {
        self.writes().into_iter().flat_map(|r| r.body).collect()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

fn header(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn handle(
    state: Arc<ProxyState>,
    connection: usize,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let op = header(&req, "x-enproxy-op").unwrap_or_default();
    let id = header(&req, "x-enproxy-id").unwrap_or_default();
    let dest = header(&req, "x-enproxy-dest-addr").unwrap_or_default();
    let content_length = header(&req, "content-length").and_then(|v| v.parse().ok());
    let transfer_encoding = header(&req, "transfer-encoding");
    let content_type = header(&req, "content-type");
    let host = req
        .uri()
        .host()
        .map(str::to_string)
        .or_else(|| header(&req, "host"))
        .unwrap_or_default();
    let path = req.uri().path().to_string();
    let body = req.into_body().collect().await?.to_bytes().to_vec();

    state.requests.lock().unwrap().push(RecordedRequest {
        op: op.clone(),
        id: id.clone(),
        dest,
        host,
        path,
        content_length,
        transfer_encoding,
        content_type,
        body: body.clone(),
        connection,
    });

    let options = &state.options;
    let mut response = Response::builder();
    if let Some(proxy_host) = &options.proxy_host {
        response = response.header("X-Enproxy-Proxy-Host", proxy_host.as_str());
    }
    if let Some(status) = options.status {
        return Ok(response.status(status).body(Full::new(Bytes::new())).unwrap());
    }

    match op.as_str() {
        "write" if options.echo_in_write_response => Ok(response.body(Full::new(Bytes::from(body))).unwrap()),
        "write" => {
            state.queues.lock().unwrap().entry(id).or_default().extend_from_slice(&body);
            Ok(response.body(Full::new(Bytes::new())).unwrap())
        }
        "read" => {
            let deadline = tokio::time::Instant::now() + options.read_wait;
            let data = loop {
                let queued = state
                    .queues
                    .lock()
                    .unwrap()
                    .get_mut(&id)
                    .map(std::mem::take)
                    .unwrap_or_default();
                if !queued.is_empty() || tokio::time::Instant::now() >= deadline {
                    break queued;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            };
            if options.eof_on_read && data.is_empty() {
                response = response.header("X-Enproxy-EOF", "true");
            }
            Ok(response.body(Full::new(Bytes::from(data))).unwrap())
        }
        _ => Ok(response
            .status(StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::new()))
            .unwrap()),
    }
}
