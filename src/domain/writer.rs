use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::models::{DispatchJob, PendingRequest, WriteCommand, WriteRequest};
use super::strategy::RequestStrategy;
use super::{Result, TunnelError};

/// Write pipeline: turns caller writes into requests for the dispatcher.
///
/// Dropping the writer drops the dispatch sender, which is how the
/// dispatcher learns that no more requests will follow.
pub(crate) struct Writer {
    id: String,
    commands: mpsc::Receiver<WriteCommand>,
    strategy: Box<dyn RequestStrategy>,
    dispatch: mpsc::Sender<DispatchJob>,
    async_errors: mpsc::Sender<TunnelError>,
    done: watch::Receiver<bool>,
}

impl Writer {
    pub fn new(
        id: String,
        commands: mpsc::Receiver<WriteCommand>,
        strategy: Box<dyn RequestStrategy>,
        dispatch: mpsc::Sender<DispatchJob>,
        async_errors: mpsc::Sender<TunnelError>,
        done: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            commands,
            strategy,
            dispatch,
            async_errors,
            done,
        }
    }

    pub async fn run(mut self) {
        loop {
            let deadline = self.strategy.flush_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(WriteCommand::Write(request)) => self.write(request).await,
                    Some(WriteCommand::Flush(reply)) => {
                        let _ = reply.send(self.flush().await);
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Err(e) = self.flush().await {
                        self.report(e);
                    }
                }
                _ = self.done.changed() => break,
            }
        }

        if let Err(e) = self.flush().await {
            debug!("[{}] Final flush failed: {}", self.id, e);
        }
        debug!("[{}] Done writing", self.id);
    }

    /// Accepts one caller write. When a later chunk of a split write fails,
    /// the bytes already delivered are acknowledged and the error is left for
    /// the next call.
    async fn write(&mut self, request: WriteRequest) {
        let WriteRequest { data, reply } = request;
        let accepted = data.len();

        let mut sent = 0;
        let mut result = Ok(accepted);
        for pending in self.strategy.write(data) {
            let length = pending.length;
            match self.send(pending).await {
                Ok(()) => sent += length,
                Err(e) if sent > 0 => {
                    self.report(e);
                    result = Ok(sent);
                    break;
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let _ = reply.send(result);
    }

    async fn flush(&mut self) -> Result<()> {
        match self.strategy.flush() {
            Some(pending) => self.send(pending).await,
            None => Ok(()),
        }
    }

    async fn send(&mut self, request: PendingRequest) -> Result<()> {
        let (finished, on_finished) = oneshot::channel();
        self.dispatch
            .send(DispatchJob { request, finished })
            .await
            .map_err(|_| TunnelError::Closed)?;
        on_finished.await.map_err(|_| TunnelError::Closed)?
    }

    /// Hands an error nobody is waiting for to the next Read or Write.
    fn report(&self, err: TunnelError) {
        if let Err(e) = self.async_errors.try_send(err) {
            warn!("[{}] Dropping unreported error: {}", self.id, e);
        }
    }
}
