//! Running streams: a timer-free, cancellable event sequence per stream, and the async driver
//! that paces it.
use super::generator::EventGenerator;
use super::kind::StreamKind;
use super::message::{ConnectionId, StreamConfig, StreamEvent, StreamId};
use chrono::Utc;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::*;

/// Where a running stream sends what it generates
pub trait EventSink: Send + Sync + 'static {
    /// Hand over one event.  Returns `false` once the stream is no longer wanted, which ends it.
    fn deliver(&self, event: StreamEvent) -> bool;
}

/// One stream, as a lazy and potentially infinite sequence of events.
///
/// Iterating yields events back to back; pacing them is the driver's job (see
/// [`StreamScheduler::spawn`]), so tests can pull events without any clock.  After
/// [`StreamHandle::cancel`] the sequence is over for good.
#[derive(Debug)]
pub struct StreamHandle {
    id: StreamId,
    connection_id: ConnectionId,
    interval: Duration,
    generator: EventGenerator,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn new(
        id: StreamId,
        connection_id: ConnectionId,
        kind: StreamKind,
        config: &StreamConfig,
        seed: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            connection_id,
            interval: config.interval_for(kind),
            generator: EventGenerator::new(kind, config, seed),
            cancel,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn kind(&self) -> StreamKind {
        self.generator.kind()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// How long to wait before the next event: the interval, stretched by a random share of the
    /// kind's jitter.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = self.kind().jitter();
        if jitter > 0.0 {
            let stretch = self.generator.rng().gen_range(0.0..=jitter);
            self.interval.mul_f64(1.0 + stretch)
        } else {
            self.interval
        }
    }
}

impl Iterator for StreamHandle {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }

        Some(StreamEvent {
            kind: self.generator.kind(),
            stream_id: self.id,
            data: self.generator.generate(),
            timestamp: Utc::now(),
        })
    }
}

/// Owns the tasks that drive every stream in the process.
///
/// Each stream's cancellation token is a child of the scheduler's root token, so shutting the
/// scheduler down stops everything at once.
#[derive(Clone, Debug, Default)]
pub struct StreamScheduler {
    tracker: TaskTracker,
    root: CancellationToken,
}

impl StreamScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cancellation token for a new stream
    pub fn stream_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Start pacing `handle`, delivering every event to `sink` until the stream is cancelled or
    /// the sink refuses an event.
    pub fn spawn<S: EventSink>(&self, handle: StreamHandle, sink: S) {
        let span = debug_span!("stream", stream_id = %handle.id(), kind = %handle.kind(), connection_id = %handle.connection_id());
        self.tracker.spawn(drive(handle, sink).instrument(span));
    }

    /// Number of stream tasks still running
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every stream.  No new streams may be spawned afterwards.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
    }

    /// Wait for every stream task to finish.  Only returns after [`Self::shutdown`].
    pub async fn wait(&self) {
        self.tracker.wait().await
    }
}

async fn drive<S: EventSink>(mut handle: StreamHandle, sink: S) {
    let cancel = handle.cancellation_token();
    debug!(interval_ms = handle.interval().as_millis() as u64, "Stream started");

    loop {
        let delay = handle.next_delay();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        // `next` checks for cancellation itself, right before generating
        let Some(event) = handle.next() else {
            break;
        };
        if !sink.deliver(event) {
            debug!("Sink refused event");
            break;
        }
    }

    debug!("Stream ended");
}
