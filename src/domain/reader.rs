use hyper::body::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, warn};

use super::models::{HostWithResponse, Inbound, ReadRequest};
use super::TunnelError;

/// Read pipeline: hands inbound response bytes to caller reads.
///
/// Inbound bodies are always accepted, even with no caller read pending, so
/// the dispatcher never waits on the reader. A read poll is requested only
/// when a caller read is pending, nothing is buffered, the stream has not
/// ended and no poll is already in flight.
///
/// Buffered bodies are not bounded: holding them back would stall the
/// dispatcher and, with it, the caller's writes.
pub(crate) struct Reader {
    id: String,
    requests: mpsc::Receiver<ReadRequest>,
    inbound: mpsc::Receiver<Inbound>,
    poll: Arc<Notify>,
    async_errors: mpsc::Sender<TunnelError>,
    done: watch::Receiver<bool>,
    buffered: VecDeque<Bytes>,
    pending: Option<ReadRequest>,
    poll_in_flight: bool,
    seeded: bool,
    eof: bool,
    disconnected: bool,
}

impl Reader {
    pub fn new(
        id: String,
        requests: mpsc::Receiver<ReadRequest>,
        inbound: mpsc::Receiver<Inbound>,
        poll: Arc<Notify>,
        async_errors: mpsc::Sender<TunnelError>,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            requests,
            inbound,
            poll,
            async_errors,
            done,
            buffered: VecDeque::new(),
            pending: None,
            poll_in_flight: false,
            seeded: false,
            eof: false,
            disconnected: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            self.serve_pending();

            tokio::select! {
                inbound = self.inbound.recv(), if !self.disconnected => match inbound {
                    Some(Inbound::Response { response, poll }) => self.accept(response, poll),
                    Some(Inbound::PollFailed(err)) => self.fail_poll(err),
                    None => self.disconnected = true,
                },
                request = self.requests.recv(), if self.pending.is_none() => match request {
                    Some(request) => self.pending = Some(request),
                    None => break,
                },
                _ = self.done.changed() => break,
            }
        }

        self.requests.close();
        let queued = std::iter::from_fn(|| self.requests.try_recv().ok());
        for pending in self.pending.take().into_iter().chain(queued) {
            let _ = pending.reply.send(Ok(Bytes::new()));
        }
        debug!("[{}] Done reading", self.id);
    }

    fn accept(&mut self, response: HostWithResponse, poll: bool) {
        if poll {
            self.poll_in_flight = false;
        }
        if !self.seeded {
            self.seeded = true;
            debug!("[{}] First response received via {}", self.id, response.host);
        }
        if !response.body.is_empty() {
            self.buffered.push_back(response.body);
        }
        if response.eof {
            debug!("[{}] Destination closed the stream", self.id);
            self.eof = true;
        }
    }

    fn fail_poll(&mut self, err: TunnelError) {
        self.poll_in_flight = false;
        match self.pending.take() {
            Some(pending) if !pending.reply.is_closed() => {
                let _ = pending.reply.send(Err(err));
            }
            _ => {
                if let Err(e) = self.async_errors.try_send(err) {
                    warn!("[{}] Dropping unreported error: {}", self.id, e);
                }
            }
        }
    }

    fn serve_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.reply.is_closed() {
            return;
        }

        if let Some(data) = self.take(pending.max) {
            // The caller gave up on this read; keep the bytes for the next one.
            if let Err(Ok(data)) = pending.reply.send(Ok(data)) {
                self.buffered.push_front(data);
            }
        } else if self.eof {
            let _ = pending.reply.send(Ok(Bytes::new()));
        } else if self.disconnected {
            let _ = pending.reply.send(Err(TunnelError::Closed));
        } else {
            if !self.poll_in_flight {
                self.poll_in_flight = true;
                self.poll.notify_one();
            }
            self.pending = Some(pending);
        }
    }

    fn take(&mut self, max: usize) -> Option<Bytes> {
        let front = self.buffered.front_mut()?;
        if front.len() > max {
            return Some(front.split_to(max));
        }
        self.buffered.pop_front()
    }
}
