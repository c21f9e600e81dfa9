use hyper::body::Bytes;
use std::time::Duration;
use tokio::time::Instant;

use super::models::{PendingRequest, MAX_REQUEST_BODY};

/// Policy turning caller writes into request bodies.
pub trait RequestStrategy: Send {
    /// Accept one caller write, returning the requests that must go out now.
    fn write(&mut self, data: Bytes) -> Vec<PendingRequest>;

    /// Latest instant at which buffered bytes must be sent, if any are buffered.
    fn flush_deadline(&self) -> Option<Instant>;

    /// Take everything currently buffered.
    fn flush(&mut self) -> Option<PendingRequest>;
}

pub fn for_config(buffer_requests: bool, flush_timeout: Duration) -> Box<dyn RequestStrategy> {
    if buffer_requests {
        Box::new(BufferingStrategy::new(flush_timeout))
    } else {
        Box::new(StreamingStrategy)
    }
}

fn chunked(mut data: Bytes) -> Vec<PendingRequest> {
    let mut requests = Vec::with_capacity(data.len() / MAX_REQUEST_BODY + 1);
    while data.len() > MAX_REQUEST_BODY {
        requests.push(PendingRequest::new(data.split_to(MAX_REQUEST_BODY)));
    }
    if !data.is_empty() {
        requests.push(PendingRequest::new(data));
    }
    requests
}

/// Sends every write as soon as it arrives.
#[derive(Debug, Default)]
pub struct StreamingStrategy;

impl RequestStrategy for StreamingStrategy {
    fn write(&mut self, data: Bytes) -> Vec<PendingRequest> {
        chunked(data)
    }

    fn flush_deadline(&self) -> Option<Instant> {
        None
    }

    fn flush(&mut self) -> Option<PendingRequest> {
        None
    }
}

/// Accumulates writes until the flush timeout elapses or the body is full.
#[derive(Debug)]
pub struct BufferingStrategy {
    buffer: Vec<u8>,
    deadline: Option<Instant>,
    flush_timeout: Duration,
}

impl BufferingStrategy {
    pub fn new(flush_timeout: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            deadline: None,
            flush_timeout,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl RequestStrategy for BufferingStrategy {
    fn write(&mut self, data: Bytes) -> Vec<PendingRequest> {
        if data.is_empty() {
            return Vec::new();
        }
        if self.buffer.is_empty() {
            self.deadline = Some(Instant::now() + self.flush_timeout);
        }
        self.buffer.extend_from_slice(&data);

        if self.buffer.len() < MAX_REQUEST_BODY {
            return Vec::new();
        }
        let full = self.buffer.len() - self.buffer.len() % MAX_REQUEST_BODY;
        let ready: Vec<u8> = self.buffer.drain(..full).collect();
        if self.buffer.is_empty() {
            self.deadline = None;
        }
        chunked(Bytes::from(ready))
    }

    fn flush_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn flush(&mut self) -> Option<PendingRequest> {
        self.deadline = None;
        if self.buffer.is_empty() {
            return None;
        }
        Some(PendingRequest::new(Bytes::from(std::mem::take(&mut self.buffer))))
    }
}
