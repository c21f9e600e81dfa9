use hyper::body::Bytes;
use std::time::Duration;
use tokio::sync::oneshot;

use super::Result;

// Header names are lowercase so they can back `HeaderName::from_static`;
// requests are written title-cased on the wire.
pub const X_ENPROXY_OP: &str = "x-enproxy-op";
pub const X_ENPROXY_ID: &str = "x-enproxy-id";
pub const X_ENPROXY_DEST_ADDR: &str = "x-enproxy-dest-addr";
pub const X_ENPROXY_PROXY_HOST: &str = "x-enproxy-proxy-host";
pub const X_ENPROXY_EOF: &str = "x-enproxy-eof";

pub const OCTET_STREAM: &str = "application/octet-stream";

pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(35);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(70);

/// A proxy connection closer than this to its idle deadline is replaced before use.
pub const REDIAL_MARGIN: Duration = Duration::from_secs(1);

/// Upper bound for a single request body.
pub const MAX_REQUEST_BODY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Write,
    Read,
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Write => "write",
            Op::Read => "read",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outbound request body, consumed once by the protocol engine.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub body: Bytes,
    pub length: usize,
}

impl PendingRequest {
    pub fn new(body: Bytes) -> Self {
        let length = body.len();
        Self { body, length }
    }

    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// A successful proxy response, tagged with the host it was obtained from.
#[derive(Debug, Clone)]
pub struct HostWithResponse {
    pub host: String,
    pub body: Bytes,
    pub eof: bool,
}

pub(crate) struct WriteRequest {
    pub data: Bytes,
    pub reply: oneshot::Sender<Result<usize>>,
}

pub(crate) enum WriteCommand {
    Write(WriteRequest),
    Flush(oneshot::Sender<Result<()>>),
}

pub(crate) struct ReadRequest {
    pub max: usize,
    pub reply: oneshot::Sender<Result<Bytes>>,
}

pub(crate) struct DispatchJob {
    pub request: PendingRequest,
    pub finished: oneshot::Sender<Result<()>>,
}

/// What the dispatch task hands to the read task.
pub(crate) enum Inbound {
    Response { response: HostWithResponse, poll: bool },
    PollFailed(crate::domain::TunnelError),
}
