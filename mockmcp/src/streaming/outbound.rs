//! A connection's outbound queue.
//!
//! Control replies and generated events share one FIFO, so a client reads them in the order they
//! were queued.  Only events count against the capacity: a client that can't keep up loses
//! events, never the replies to its own requests.
use super::message::{OutboundMessage, ServerMessage, StreamEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// What happened to an event offered to the queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EventQueued {
    Queued,
    /// Too many events already waiting
    Dropped,
    /// Nobody is reading any more
    Closed,
}

/// Create a queue that holds at most `event_capacity` unread events
pub(crate) fn channel(event_capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_events = Arc::new(AtomicUsize::new(0));

    (
        OutboundSender {
            tx,
            pending_events: pending_events.clone(),
            event_capacity: event_capacity.max(1),
        },
        OutboundReceiver { rx, pending_events },
    )
}

#[derive(Debug)]
pub(crate) struct OutboundSender {
    tx: mpsc::UnboundedSender<OutboundMessage>,
    pending_events: Arc<AtomicUsize>,
    event_capacity: usize,
}

impl OutboundSender {
    /// Queue a control message.  Only fails once the receiver is gone.
    pub(crate) fn send_control(&self, message: ServerMessage) -> bool {
        self.tx.send(message.into()).is_ok()
    }

    /// Queue an event unless the reader is already `event_capacity` events behind.
    ///
    /// Callers must not race each other; the registry only calls this under its lock.
    pub(crate) fn send_event(&self, event: StreamEvent) -> EventQueued {
        if self.tx.is_closed() {
            return EventQueued::Closed;
        }
        if self.pending_events.load(Ordering::Acquire) >= self.event_capacity {
            return EventQueued::Dropped;
        }

        self.pending_events.fetch_add(1, Ordering::AcqRel);
        match self.tx.send(event.into()) {
            Ok(()) => EventQueued::Queued,
            Err(_) => {
                self.pending_events.fetch_sub(1, Ordering::AcqRel);
                EventQueued::Closed
            }
        }
    }
}

/// The reading end of a connection's outbound queue.  Ends once the registry has dropped the
/// connection and everything already queued has been read.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundMessage>,
    pending_events: Arc<AtomicUsize>,
}

impl OutboundReceiver {
    /// Wait for the next message.  Cancel safe.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        let message = self.rx.recv().await;
        self.taken(message.as_ref());
        message
    }

    pub fn try_recv(&mut self) -> Result<OutboundMessage, TryRecvError> {
        let message = self.rx.try_recv()?;
        self.taken(Some(&message));
        Ok(message)
    }

    /// Events queued but not read yet
    pub fn pending_events(&self) -> usize {
        self.pending_events.load(Ordering::Acquire)
    }

    fn taken(&self, message: Option<&OutboundMessage>) {
        if let Some(OutboundMessage::Event(_)) = message {
            self.pending_events.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
