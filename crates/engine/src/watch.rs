//! Change feed queue
//!
//! A feed is a single-producer, single-consumer queue. The producer is the
//! subscription handler running on the transport's task; the consumer is
//! the caller iterating a [`Watch`]. Termination travels through the same
//! queue as entries, so everything enqueued before a stop is still observed.
//!
//! # States
//!
//! ```text
//! Active ──(bound reached / stop())──> Draining ──> Closed
//! Active ──(delivery or transport error)──────────> Failed
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use strata_kv_core::{Entry, Error, Result};
use strata_kv_wire::SubscriptionHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Lifecycle of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Entries are being delivered
    Active,
    /// No further entries will be produced; queued ones remain readable
    Draining,
    /// Terminated normally
    Closed,
    /// Terminated with an error
    Failed,
}

enum FeedEvent {
    Entry(Entry),
    Stop(Option<Error>),
}

struct Shared {
    stopped: AtomicBool,
    received: AtomicU64,
}

/// Producer side of a feed
#[derive(Clone)]
pub(crate) struct FeedSink {
    tx: mpsc::UnboundedSender<FeedEvent>,
    shared: Arc<Shared>,
}

impl FeedSink {
    /// Enqueue an entry; ignored once the feed is stopped
    pub(crate) fn push(&self, entry: Entry) -> u64 {
        if self.is_stopped() {
            return self.received();
        }
        let _ = self.tx.send(FeedEvent::Entry(entry));
        self.shared.received.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Terminate the feed; only the first call has an effect
    pub(crate) fn stop(&self, error: Option<Error>) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(err) = &error {
            warn!(target: "strata::kv::watch", error = %err, "feed terminated");
        }
        let _ = self.tx.send(FeedEvent::Stop(error));
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn received(&self) -> u64 {
        self.shared.received.load(Ordering::SeqCst)
    }
}

/// An ordered, cancelable stream of bucket entries
///
/// Returned by `Bucket::watch` and `Bucket::history`. Dropping a `Watch`
/// unsubscribes from the log.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
    sink: FeedSink,
    state: FeedState,
    handle: Option<SubscriptionHandle>,
}

impl Watch {
    /// A feed with its producer side
    pub(crate) fn channel() -> (Self, FeedSink) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = FeedSink {
            tx,
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                received: AtomicU64::new(0),
            }),
        };
        let watch = Self {
            rx,
            sink: sink.clone(),
            state: FeedState::Active,
            handle: None,
        };
        (watch, sink)
    }

    /// A feed that is already closed and yields nothing
    pub(crate) fn finished() -> Self {
        let (mut watch, sink) = Self::channel();
        sink.stop(None);
        watch.state = FeedState::Closed;
        watch
    }

    pub(crate) fn attach(&mut self, handle: SubscriptionHandle) {
        self.handle = Some(handle);
    }

    /// Next entry, `Ok(None)` once the feed has closed
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the feed, once; later calls return
    /// `Ok(None)`.
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        if matches!(self.state, FeedState::Closed | FeedState::Failed) {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(FeedEvent::Entry(entry)) => Ok(Some(entry)),
            Some(FeedEvent::Stop(None)) | None => {
                self.finish(FeedState::Closed);
                Ok(None)
            }
            Some(FeedEvent::Stop(Some(err))) => {
                self.finish(FeedState::Failed);
                Err(err)
            }
        }
    }

    /// Stop soliciting deliveries; entries already queued stay readable
    pub fn stop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.unsubscribe();
        }
        self.sink.stop(None);
    }

    /// Current state
    pub fn state(&self) -> FeedState {
        match self.state {
            FeedState::Active if self.sink.is_stopped() => FeedState::Draining,
            state => state,
        }
    }

    /// Entries received from the log so far
    pub fn received(&self) -> u64 {
        self.sink.received()
    }

    /// True once the feed has closed or failed
    pub fn is_terminated(&self) -> bool {
        matches!(self.state, FeedState::Closed | FeedState::Failed)
    }

    /// Read every remaining entry until the feed closes
    pub async fn collect(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    fn finish(&mut self, state: FeedState) {
        self.state = state;
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe();
        }
        debug!(target: "strata::kv::watch", ?state, received = self.received(), "feed finished");
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.unsubscribe();
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("state", &self.state())
            .field("received", &self.received())
            .finish()
    }
}
