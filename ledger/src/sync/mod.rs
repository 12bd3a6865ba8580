//! Client-side mirroring of ledger sessions.
//!
//! A [`SyncAgent`] follows one session through a [`LedgerSource`]: pushed
//! envelopes when the source offers a subscription, polling otherwise. It
//! keeps a [`SessionView`] of the latest known state and reports
//! [`Transition`]s to its observer through the [`SyncHandle`] returned by
//! [`SyncAgent::spawn`].
//!
//! Read failures never end the agent; they are retried with [`Backoff`]
//! while the last good view stays available. The agent stops when the
//! session ends, when [`SyncHandle::cancel`] is called, or when the handle is
//! dropped.

pub mod backoff;
pub mod local;
pub mod rematch;
pub mod view;

use crate::error::LedgerError;
use crate::game::{EventEnvelope, Identity, Session, SessionId};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

pub use backoff::Backoff;
pub use rematch::{accept_rematch, Paired, RematchError, RematchOffer};
pub use view::{Applied, SessionView, Transition};

/// Failure reading from or writing to the ledger, as seen by a client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Connectivity problem, timeout, or a write still awaiting confirmation
    #[error("transient ledger failure: {0}")]
    Transient(String),
    /// The ledger refused the request
    #[error("ledger rejected request: {0}")]
    Rejected(LedgerError),
    /// The server could not accept the request at all (bad route, body or
    /// content type). Resending it unchanged cannot succeed.
    #[error("request refused with status {status}: {message}")]
    Refused { status: u16, message: String },
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }

    /// True when the failure can never clear (session ended, bad code)
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceError::Rejected(e) if e.is_terminal())
    }
}

impl From<LedgerError> for SourceError {
    fn from(err: LedgerError) -> Self {
        SourceError::Rejected(err)
    }
}

/// Item delivered over a push subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Push {
    /// Full state, sent first on every subscription
    Snapshot { session: Session },
    Event { envelope: EventEnvelope },
    /// The subscription dropped envelopes; the receiver must resync
    Lagged { missed: u64 },
}

pub type PushStream = BoxStream<'static, Push>;

/// Read side of the ledger used by sync agents
#[async_trait]
pub trait LedgerSource: Send + Sync + 'static {
    async fn fetch(&self, session_id: SessionId) -> Result<Session, SourceError>;

    /// Open a push subscription. `Ok(None)` means this source has no push
    /// transport and the agent should poll.
    async fn subscribe(&self, session_id: SessionId) -> Result<Option<PushStream>, SourceError>;
}

/// Operations the rematch flow needs on top of reads
#[async_trait]
pub trait LedgerClient: LedgerSource {
    async fn create_session(&self, creator: &Identity) -> Result<SessionId, SourceError>;

    async fn join_session(
        &self,
        session_id: SessionId,
        joiner: &Identity,
    ) -> Result<Session, SourceError>;
}

/// Timing knobs for a sync agent
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Fallback poll period, used only while no push subscription is live
    pub poll_interval: Duration,
    /// First retry delay after a failed read
    pub backoff_initial: Duration,
    /// Ceiling for retry delays
    pub backoff_max: Duration,
    /// How often to retry opening a push subscription while polling
    pub resubscribe_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_initial: Duration::from_millis(250),
            backoff_max: Duration::from_secs(10),
            resubscribe_interval: Duration::from_secs(15),
        }
    }
}

impl SyncConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// How the agent is currently receiving updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Push,
    Poll,
}

/// Health of an agent, for display and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub transport: Transport,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub finished: bool,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            transport: Transport::Poll,
            consecutive_failures: 0,
            last_error: None,
            finished: false,
        }
    }
}

/// Observer side of a running agent
pub struct SyncHandle {
    session_id: SessionId,
    view: watch::Receiver<Option<Session>>,
    status: watch::Receiver<SyncStatus>,
    transitions: mpsc::UnboundedReceiver<Transition>,
    stop_signal: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Last good view, if any read has succeeded yet
    pub fn session(&self) -> Option<Session> {
        self.view.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// A receiver that is notified whenever the view changes
    pub fn watch_view(&self) -> watch::Receiver<Option<Session>> {
        self.view.clone()
    }

    /// Next transition, or `None` once the agent has stopped and all
    /// transitions were consumed
    pub async fn next_transition(&mut self) -> Option<Transition> {
        self.transitions.recv().await
    }

    /// Wait until the view satisfies `predicate`, returning that view.
    /// `None` if the agent stops first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<Session>
    where
        F: Fn(&Session) -> bool,
    {
        loop {
            if let Some(session) = self.view.borrow_and_update().as_ref() {
                if predicate(session) {
                    return Some(session.clone());
                }
            }
            if self.view.changed().await.is_err() {
                return self.view.borrow().clone().filter(|s| predicate(s));
            }
        }
    }

    /// Stop the agent and wait for its task to exit
    pub async fn cancel(mut self) {
        let _ = self.stop_signal.send(());
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let _ = self.stop_signal.send(());
    }
}

enum Wake {
    Stop,
    Fetch,
    Push(Option<Push>),
    Resubscribe,
}

/// Reconciliation loop for one session
pub struct SyncAgent<S: LedgerSource + ?Sized> {
    source: Arc<S>,
    session_id: SessionId,
    config: SyncConfig,
    view: SessionView,
    backoff: Backoff,
    view_tx: watch::Sender<Option<Session>>,
    status_tx: watch::Sender<SyncStatus>,
    transitions_tx: mpsc::UnboundedSender<Transition>,
    stop_rx: broadcast::Receiver<()>,
}

impl<S: LedgerSource + ?Sized> SyncAgent<S> {
    /// Start following `session_id` on the current tokio runtime
    pub fn spawn(source: Arc<S>, session_id: SessionId, config: SyncConfig) -> SyncHandle {
        let (view_tx, view_rx) = watch::channel(None);
        let (status_tx, status_rx) = watch::channel(SyncStatus::default());
        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let agent = SyncAgent {
            backoff: Backoff::new(config.backoff_initial, config.backoff_max),
            source,
            session_id,
            config,
            view: SessionView::new(),
            view_tx,
            status_tx,
            transitions_tx,
            stop_rx,
        };
        let task = tokio::spawn(agent.run());

        SyncHandle {
            session_id,
            view: view_rx,
            status: status_rx,
            transitions: transitions_rx,
            stop_signal: stop_tx,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        let session_id = self.session_id;
        debug!(session_id, "sync agent started");

        let mut push: Option<PushStream> = None;
        let mut subscribe_at = Instant::now();
        let mut fetch_at = Some(Instant::now());

        while !self.view.is_terminal() {
            if push.is_none() && Instant::now() >= subscribe_at {
                let subscribed = tokio::select! {
                    _ = self.stop_rx.recv() => None,
                    result = self.source.subscribe(session_id) => Some(result),
                };
                let Some(result) = subscribed else {
                    debug!(session_id, "sync agent cancelled while subscribing");
                    break;
                };

                match result {
                    Ok(Some(stream)) => {
                        debug!(session_id, "push subscription open");
                        push = Some(stream);
                        // Every subscription opens with a snapshot
                        fetch_at = None;
                        self.set_transport(Transport::Push);
                    }
                    Ok(None) => {
                        subscribe_at = Instant::now() + self.config.resubscribe_interval;
                    }
                    Err(e) => {
                        debug!(session_id, error = %e, "push subscription failed, polling");
                        subscribe_at = Instant::now() + self.config.resubscribe_interval;
                    }
                }
            }

            let polling = push.is_none();
            let wake = {
                let fetch_timer = async {
                    match fetch_at {
                        Some(at) => sleep_until(at).await,
                        None => pending().await,
                    }
                };
                let next_push = async {
                    match push.as_mut() {
                        Some(stream) => stream.next().await,
                        None => pending().await,
                    }
                };

                tokio::select! {
                    _ = self.stop_rx.recv() => Wake::Stop,
                    _ = fetch_timer => Wake::Fetch,
                    item = next_push => Wake::Push(item),
                    _ = sleep_until(subscribe_at), if polling => Wake::Resubscribe,
                }
            };

            match wake {
                Wake::Stop => {
                    debug!(session_id, "sync agent cancelled");
                    break;
                }

                Wake::Fetch => {
                    let fetched = tokio::select! {
                        _ = self.stop_rx.recv() => None,
                        result = self.source.fetch(session_id) => Some(result),
                    };
                    let Some(result) = fetched else {
                        debug!(session_id, "sync agent cancelled during fetch");
                        break;
                    };

                    match result {
                        Ok(snapshot) => {
                            self.record_success();
                            let transitions = self.view.reconcile(snapshot);
                            self.publish(transitions);
                            fetch_at = if push.is_none() {
                                Some(Instant::now() + self.config.poll_interval)
                            } else {
                                None
                            };
                        }
                        Err(e) => {
                            let delay = self.record_failure(&e);
                            fetch_at = Some(Instant::now() + delay);
                        }
                    }
                }

                Wake::Push(Some(Push::Snapshot { session })) => {
                    self.record_success();
                    let transitions = self.view.reconcile(session);
                    self.publish(transitions);
                    fetch_at = None;
                }

                Wake::Push(Some(Push::Event { envelope })) => {
                    match self.view.apply_event(&envelope) {
                        Applied::Advanced(transitions) => self.publish(transitions),
                        Applied::Duplicate => {}
                        Applied::Gap { have, got } => {
                            debug!(session_id, ?have, got, "missed envelopes, resyncing");
                            fetch_at = Some(Instant::now());
                        }
                    }
                }

                Wake::Push(Some(Push::Lagged { missed })) => {
                    debug!(session_id, missed, "push subscription lagged, resyncing");
                    fetch_at = Some(Instant::now());
                }

                Wake::Push(None) => {
                    info!(session_id, "push subscription closed, falling back to polling");
                    push = None;
                    subscribe_at = Instant::now() + self.config.resubscribe_interval;
                    fetch_at = Some(Instant::now());
                    self.set_transport(Transport::Poll);
                }

                Wake::Resubscribe => {}
            }
        }

        if self.view.is_terminal() {
            info!(session_id, "session ended, sync agent stopping");
        }
        self.status_tx.send_modify(|status| status.finished = true);
    }

    fn publish(&mut self, transitions: Vec<Transition>) {
        self.view_tx.send_replace(self.view.session().cloned());
        for transition in transitions {
            debug!(session_id = self.session_id, ?transition, "transition");
            // Observer may have stopped listening; keep mirroring regardless
            let _ = self.transitions_tx.send(transition);
        }
    }

    fn set_transport(&mut self, transport: Transport) {
        self.status_tx.send_modify(|status| status.transport = transport);
    }

    fn record_success(&mut self) {
        self.backoff.reset();
        self.status_tx.send_modify(|status| {
            status.consecutive_failures = 0;
            status.last_error = None;
        });
    }

    fn record_failure(&mut self, error: &SourceError) -> Duration {
        let delay = self.backoff.next_delay();
        let failures = self.backoff.attempts();
        warn!(
            session_id = self.session_id,
            failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "session read failed"
        );
        self.status_tx.send_modify(|status| {
            status.consecutive_failures = failures;
            status.last_error = Some(error.to_string());
        });
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::game::LedgerEvent;
    use crate::ledger::{LedgerSettings, SessionLedger};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::time::timeout;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn fast() -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(20),
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_millis(40),
            resubscribe_interval: Duration::from_millis(50),
        }
    }

    /// Poll-only view of a ledger that can be told to fail reads
    struct FlakySource {
        ledger: Arc<SessionLedger>,
        failing: AtomicBool,
        fetches: AtomicU32,
    }

    impl FlakySource {
        fn new(ledger: Arc<SessionLedger>) -> Self {
            Self {
                ledger,
                failing: AtomicBool::new(false),
                fetches: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerSource for FlakySource {
        async fn fetch(&self, session_id: SessionId) -> Result<Session, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::Transient("connection refused".to_string()));
            }
            Ok(self.ledger.get_session(session_id).await?)
        }

        async fn subscribe(
            &self,
            _session_id: SessionId,
        ) -> Result<Option<PushStream>, SourceError> {
            Ok(None)
        }
    }

    /// Push feeds handed out one per subscription, then the ledger's own
    /// feed once `live` is set. Reads always go to the ledger.
    struct ScriptedSource {
        ledger: Arc<SessionLedger>,
        feeds: std::sync::Mutex<Vec<mpsc::UnboundedReceiver<Push>>>,
        live: AtomicBool,
        fetches: AtomicU32,
        subscribes: AtomicU32,
    }

    impl ScriptedSource {
        fn new(ledger: Arc<SessionLedger>, feed: mpsc::UnboundedReceiver<Push>) -> Self {
            Self {
                ledger,
                feeds: std::sync::Mutex::new(vec![feed]),
                live: AtomicBool::new(false),
                fetches: AtomicU32::new(0),
                subscribes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerSource for ScriptedSource {
        async fn fetch(&self, session_id: SessionId) -> Result<Session, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.ledger.get_session(session_id).await?)
        }

        async fn subscribe(
            &self,
            session_id: SessionId,
        ) -> Result<Option<PushStream>, SourceError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let feed = self.feeds.lock().unwrap().pop();
            if let Some(feed) = feed {
                let stream = futures_util::stream::unfold(feed, |mut feed| async move {
                    feed.recv().await.map(|push| (push, feed))
                });
                return Ok(Some(stream.boxed()));
            }
            if self.live.load(Ordering::SeqCst) {
                return LedgerSource::subscribe(self.ledger.as_ref(), session_id).await;
            }
            Ok(None)
        }
    }

    /// A source whose calls never complete
    struct StuckSource;

    #[async_trait]
    impl LedgerSource for StuckSource {
        async fn fetch(&self, _session_id: SessionId) -> Result<Session, SourceError> {
            pending().await
        }

        async fn subscribe(
            &self,
            _session_id: SessionId,
        ) -> Result<Option<PushStream>, SourceError> {
            pending().await
        }
    }

    fn ledger() -> Arc<SessionLedger> {
        Arc::new(SessionLedger::new(LedgerSettings::new(id("owner"))))
    }

    #[tokio::test]
    async fn test_push_agent_reports_join_once() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;

        let mut handle = SyncAgent::spawn(ledger.clone(), game, fast());
        handle.wait_for(|_| true).await.unwrap();

        ledger.join_session(game, &id("bob")).await.unwrap();

        let transition = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            transition,
            Transition::OpponentJoined {
                session_id: game,
                player_a: id("alice"),
                player_b: id("bob"),
            }
        );
        assert_eq!(handle.status().transport, Transport::Push);

        // Nothing further until something else happens
        assert!(timeout(Duration::from_millis(100), handle.next_transition())
            .await
            .is_err());
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_poll_agent_detects_join_and_end() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;
        let source = Arc::new(FlakySource::new(ledger.clone()));

        let mut handle = SyncAgent::spawn(source, game, fast());
        ledger.join_session(game, &id("bob")).await.unwrap();
        ledger.resign(game, &id("alice")).await.unwrap();

        let mut seen = Vec::new();
        while let Some(transition) = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap()
        {
            seen.push(transition);
        }

        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], Transition::OpponentJoined { .. }));
        assert!(matches!(
            &seen[1],
            Transition::GameEnded { winner: Some(w), .. } if *w == id("bob")
        ));
        assert_eq!(handle.status().transport, Transport::Poll);
        assert!(handle.status().finished);
    }

    #[tokio::test]
    async fn test_failed_reads_keep_last_view_and_recover() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;
        let source = Arc::new(FlakySource::new(ledger.clone()));

        let mut handle = SyncAgent::spawn(source.clone(), game, fast());
        handle.wait_for(|_| true).await.unwrap();

        source.failing.store(true, Ordering::SeqCst);
        ledger.join_session(game, &id("bob")).await.unwrap();

        let failures_before = source.fetches.load(Ordering::SeqCst);
        while source.fetches.load(Ordering::SeqCst) < failures_before + 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = handle.status();
        assert!(status.consecutive_failures >= 2);
        assert!(!status.finished);
        assert!(handle.session().unwrap().player_b.is_none());

        source.failing.store(false, Ordering::SeqCst);
        let session = timeout(
            Duration::from_secs(2),
            handle.wait_for(|s| s.player_b.is_some()),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(session.player_b, Some(id("bob")));
        assert_eq!(handle.status().consecutive_failures, 0);
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_unknown_session_is_retried_not_fatal() {
        let ledger = ledger();
        let source = Arc::new(FlakySource::new(ledger.clone()));

        let handle = SyncAgent::spawn(source, 0, fast());
        tokio::time::sleep(Duration::from_millis(80)).await;

        let status = handle.status();
        assert!(!status.finished);
        assert!(status.consecutive_failures >= 1);
        assert!(handle.session().is_none());
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;
        let source = Arc::new(FlakySource::new(ledger.clone()));

        let handle = SyncAgent::spawn(source.clone(), game, fast());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel().await;

        let fetches = source.fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetches);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_agent() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;

        let handle = SyncAgent::spawn(ledger.clone(), game, fast());
        let mut view = handle.watch_view();
        drop(handle);

        // The agent drops its view sender when it exits
        let closed = timeout(Duration::from_secs(1), async {
            while view.changed().await.is_ok() {}
        })
        .await;
        assert!(closed.is_ok());
        assert_eq!(ledger.notifier().subscriber_count(game), 0);
    }

    #[tokio::test]
    async fn test_cancel_one_agent_leaves_others_running() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;

        let first = SyncAgent::spawn(ledger.clone(), game, fast());
        let mut second = SyncAgent::spawn(ledger.clone(), game, fast());
        second.wait_for(|_| true).await.unwrap();
        first.cancel().await;

        ledger.join_session(game, &id("bob")).await.unwrap();
        let session = timeout(
            Duration::from_secs(2),
            second.wait_for(|s| s.player_b.is_some()),
        )
        .await
        .unwrap();
        assert!(session.is_some());
        second.cancel().await;
    }

    async fn wait_for_transport(handle: &SyncHandle, transport: Transport) {
        timeout(Duration::from_secs(2), async {
            while handle.status().transport != transport {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_subscribe_is_stuck() {
        let handle = SyncAgent::spawn(Arc::new(StuckSource), 0, fast());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(timeout(Duration::from_secs(1), handle.cancel()).await.is_ok());
    }

    #[tokio::test]
    async fn test_revision_gap_triggers_snapshot_fetch() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;
        let created = ledger.get_session(game).await.unwrap();
        ledger.join_session(game, &id("bob")).await.unwrap();
        ledger
            .submit_move(game, &id("alice"), "e2", "e4", "fen-1", 0)
            .await
            .unwrap();

        let (feed, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource::new(ledger.clone(), rx));
        let mut handle = SyncAgent::spawn(source.clone(), game, fast());

        // Revision 1 never arrives
        feed.send(Push::Snapshot { session: created }).unwrap();
        feed.send(Push::Event {
            envelope: EventEnvelope {
                session_id: game,
                revision: 2,
                event: LedgerEvent::MoveAccepted {
                    from: "e2".to_string(),
                    to: "e4".to_string(),
                    position: "fen-1".to_string(),
                    move_count: 1,
                },
            },
        })
        .unwrap();

        let first = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap();
        assert!(matches!(first, Some(Transition::OpponentJoined { .. })));
        let second = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap();
        assert!(matches!(second, Some(Transition::MoveObserved { move_count: 1, .. })));

        assert!(source.fetches.load(Ordering::SeqCst) >= 1);
        assert_eq!(handle.session(), Some(ledger.get_session(game).await.unwrap()));
        assert_eq!(handle.status().transport, Transport::Push);
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_lagged_feed_triggers_resync() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;
        let created = ledger.get_session(game).await.unwrap();
        ledger.join_session(game, &id("bob")).await.unwrap();

        let (feed, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource::new(ledger.clone(), rx));
        let mut handle = SyncAgent::spawn(source.clone(), game, fast());

        feed.send(Push::Snapshot { session: created }).unwrap();
        feed.send(Push::Lagged { missed: 1 }).unwrap();

        let transition = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap();
        assert!(matches!(transition, Some(Transition::OpponentJoined { .. })));
        assert!(source.fetches.load(Ordering::SeqCst) >= 1);
        handle.cancel().await;
    }

    #[tokio::test]
    async fn test_closed_feed_falls_back_to_polling_then_resubscribes() {
        let ledger = ledger();
        let game = ledger.create_session(id("alice")).await;

        let (feed, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedSource::new(ledger.clone(), rx));
        let mut handle = SyncAgent::spawn(source.clone(), game, fast());

        feed.send(Push::Snapshot {
            session: ledger.get_session(game).await.unwrap(),
        })
        .unwrap();
        handle.wait_for(|_| true).await.unwrap();
        assert_eq!(handle.status().transport, Transport::Push);

        drop(feed);
        wait_for_transport(&handle, Transport::Poll).await;
        let fetches = source.fetches.load(Ordering::SeqCst);
        timeout(Duration::from_secs(2), async {
            while source.fetches.load(Ordering::SeqCst) == fetches {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        source.live.store(true, Ordering::SeqCst);
        wait_for_transport(&handle, Transport::Push).await;
        assert!(source.subscribes.load(Ordering::SeqCst) >= 2);

        ledger.join_session(game, &id("bob")).await.unwrap();
        let transition = timeout(Duration::from_secs(2), handle.next_transition())
            .await
            .unwrap();
        assert!(matches!(transition, Some(Transition::OpponentJoined { .. })));
        handle.cancel().await;
    }

    #[test]
    fn test_source_error_classification() {
        let transient = SourceError::Transient("timeout".to_string());
        assert!(transient.is_retryable());
        assert!(!transient.is_terminal());

        let ended = SourceError::from(LedgerError::from(ValidationError::GameInactive));
        assert!(!ended.is_retryable());
        assert!(ended.is_terminal());

        let refused = SourceError::Refused {
            status: 422,
            message: "missing field `caller`".to_string(),
        };
        assert!(!refused.is_retryable());
        assert!(!refused.is_terminal());
    }
}
