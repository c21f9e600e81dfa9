//! Idle-timeout decorator.
//!
//! `IdleTiming` wraps a resource together with an [`ActivityTracker`] and a
//! watchdog task. Once the tracker reports no activity for its whole idle
//! timeout, the wrapper is marked expired and the `on_expire` callback runs
//! exactly once. Reads and writes parked on the inner stream are woken at
//! expiry and fail with `TimedOut`. Must be created from within a tokio
//! runtime.

use futures::future::BoxFuture;
use futures::task::AtomicWaker;
use futures::FutureExt;
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::domain::ActivityTracker;

pub type OnExpire = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct IdleTiming<T> {
    inner: T,
    activity: Arc<ActivityTracker>,
    expiry: Arc<Expiry>,
    watchdog: JoinHandle<()>,
}

/// Expiry flag plus the tasks parked on the inner stream.
#[derive(Default)]
struct Expiry {
    expired: AtomicBool,
    read: AtomicWaker,
    write: AtomicWaker,
}

impl Expiry {
    fn expire(&self) {
        self.expired.store(true, Ordering::Release);
        self.read.wake();
        self.write.wake();
    }

    fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }
}

impl<T> IdleTiming<T> {
    /// Wrap `inner`, calling `on_expire` after `idle_timeout` without activity.
    pub fn wrap<F, Fut>(inner: T, idle_timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_tracker(inner, Arc::new(ActivityTracker::new(idle_timeout)), on_expire)
    }

    /// Like [`IdleTiming::wrap`] but driven by an existing tracker, so that
    /// activity recorded by the resource itself also keeps it alive.
    pub fn with_tracker<F, Fut>(inner: T, activity: Arc<ActivityTracker>, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let expiry = Arc::new(Expiry::default());
        let on_expire: OnExpire = Box::new(move || on_expire().boxed());
        let watchdog = tokio::spawn(watch(activity.clone(), expiry.clone(), on_expire));

        Self {
            inner,
            activity,
            expiry,
            watchdog,
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub fn mark_active(&self) {
        self.activity.mark_active();
    }

    /// Time left before this resource is expired for idleness.
    pub fn times_out_in(&self) -> Duration {
        if self.is_expired() {
            Duration::ZERO
        } else {
            self.activity.times_out_in()
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_expired()
    }

    fn expired_error() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "connection closed after idle timeout")
    }
}

async fn watch(activity: Arc<ActivityTracker>, expiry: Arc<Expiry>, on_expire: OnExpire) {
    loop {
        let remaining = activity.times_out_in();
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining).await;
    }

    debug!(
        "Idle for {:?}, expiring resource",
        activity.since_last_active()
    );
    expiry.expire();
    on_expire().await;
}

impl<T> Drop for IdleTiming<T> {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

impl<T> Deref for IdleTiming<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for IdleTiming<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.expiry.read.register(cx.waker());
        if self.is_expired() {
            return Poll::Ready(Err(Self::expired_error()));
        }
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = res {
            if buf.filled().len() > before {
                self.activity.mark_active();
            }
        }
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for IdleTiming<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.expiry.write.register(cx.waker());
        if self.is_expired() {
            return Poll::Ready(Err(Self::expired_error()));
        }
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = res {
            if n > 0 {
                self.activity.mark_active();
            }
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
