//! Idle read timeout for live tick streams.
//!
//! A dropped exchange socket does not always surface as an error. Ending the stream after a
//! silent period hands control back to the owner's reconnect loop.

use futures::Stream;
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};
use tokio::time::{Instant, Sleep};
use tracing::warn;

/// Idle period after which a silent tick stream is treated as dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Ends the wrapped stream once no item has arrived for `idle`.
#[derive(Debug)]
pub struct TimeoutStream<S> {
    inner: S,
    idle: Duration,
    sleep: Pin<Box<Sleep>>,
    timed_out: bool,
}

impl<S> TimeoutStream<S> {
    pub fn new(inner: S, idle: Duration) -> Self {
        Self {
            inner,
            idle,
            sleep: Box::pin(tokio::time::sleep(idle)),
            timed_out: false,
        }
    }

    /// True once the stream ended because `idle` elapsed without an item.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }
}

impl<S> Stream for TimeoutStream<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.timed_out {
            return Poll::Ready(None);
        }

        if let Poll::Ready(item) = Pin::new(&mut this.inner).poll_next(cx) {
            if item.is_some() {
                this.sleep.as_mut().reset(Instant::now() + this.idle);
            }
            return Poll::Ready(item);
        }

        ready!(this.sleep.as_mut().poll(cx));
        warn!(idle = ?this.idle, "no ticks within idle timeout, ending stream");
        this.timed_out = true;
        Poll::Ready(None)
    }
}
