use crate::game::{EventEnvelope, SessionId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered envelopes per subscriber before it is reported as lagged
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Publishes lifecycle envelopes per session id.
///
/// A session's channel exists only while someone subscribes to it: publishing
/// never creates one, a channel whose last receiver is gone is dropped on the
/// next publish, and the channel of an ended session is closed after its
/// final envelope. A firehose channel additionally carries every envelope for
/// whole-ledger feeds. Subscribers that fall behind receive
/// `RecvError::Lagged` and are expected to re-fetch a snapshot rather than
/// continue from a hole.
pub struct EventNotifier {
    channels: RwLock<HashMap<SessionId, broadcast::Sender<EventEnvelope>>>,
    firehose: broadcast::Sender<EventEnvelope>,
    capacity: usize,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity);
        Self {
            channels: RwLock::new(HashMap::new()),
            firehose,
            capacity,
        }
    }

    /// Subscribe to one session's envelopes
    pub fn subscribe(&self, session_id: SessionId) -> broadcast::Receiver<EventEnvelope> {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to every envelope the ledger publishes
    pub fn subscribe_all(&self) -> broadcast::Receiver<EventEnvelope> {
        self.firehose.subscribe()
    }

    /// Publish an envelope. Having no subscribers is not an error.
    pub fn publish(&self, envelope: EventEnvelope) {
        let session_id = envelope.session_id;
        let revision = envelope.revision;
        let terminal = envelope.event.is_terminal();

        let sender = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .cloned();
        let delivered = sender.map(|tx| tx.send(envelope.clone()).unwrap_or(0));
        let _ = self.firehose.send(envelope);

        match delivered {
            Some(_) if terminal => self.close(session_id),
            Some(0) => self.prune(session_id),
            _ => {}
        }
        let delivered = delivered.unwrap_or(0);

        debug!(session_id, revision, delivered, "event published");
    }

    /// Drop a session's channel. Receivers drain what is buffered, then see
    /// `RecvError::Closed`.
    pub fn close(&self, session_id: SessionId) {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }

    /// Drop a session's channel if nobody is listening on it
    fn prune(&self, session_id: SessionId) {
        let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(&session_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&session_id);
        }
    }

    /// Number of sessions with an open channel
    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live subscribers for a session
    pub fn subscriber_count(&self, session_id: SessionId) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
