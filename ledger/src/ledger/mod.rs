pub mod api;
pub mod notifier;

use crate::error::{AuthorizationError, LedgerError, LedgerResult, ValidationError};
use crate::fees::{Amount, FeeAccount, FeeMeter};
use crate::game::{
    leaderboard, EndReason, EventEnvelope, Identity, LedgerEvent, Session, SessionId, Standing,
};
use notifier::EventNotifier;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::info;

pub use notifier::DEFAULT_CHANNEL_CAPACITY;

/// Whether a creator may take the second seat of their own session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfJoinPolicy {
    Allow,
    #[default]
    Reject,
}

/// Construction parameters for a ledger
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub admin: Identity,
    pub fee_rate: Amount,
    pub self_join: SelfJoinPolicy,
    pub channel_capacity: usize,
}

impl LedgerSettings {
    pub fn new(admin: Identity) -> Self {
        Self {
            admin,
            fee_rate: 0,
            self_join: SelfJoinPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Subset of sessions returned by [`SessionLedger::list_sessions`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFilter {
    All,
    /// Active and still waiting for a second player
    Open,
    Active,
    Ended,
    /// Sessions where the identity holds either seat
    Player(Identity),
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        match self {
            SessionFilter::All => true,
            SessionFilter::Open => session.is_open(),
            SessionFilter::Active => session.active,
            SessionFilter::Ended => !session.active,
            SessionFilter::Player(identity) => session.is_participant(identity),
        }
    }
}

/// A snapshot plus a live subscription that starts no later than the snapshot
pub struct Watch {
    pub snapshot: Session,
    pub events: broadcast::Receiver<EventEnvelope>,
}

type Entry = Arc<Mutex<Session>>;

/// Authoritative store of sessions and the single writer for each of them.
///
/// Sessions live in an append-only vector whose index is the session id. The
/// vector lock is held only to look up or append an entry; every lifecycle
/// operation then runs under that session's own mutex, so operations on one
/// id are totally ordered while distinct ids never wait on each other.
///
/// Every operation validates fully before mutating anything. A rejected call
/// leaves the session exactly as it was and publishes nothing.
pub struct SessionLedger {
    sessions: RwLock<Vec<Entry>>,
    fees: FeeMeter,
    notifier: EventNotifier,
    self_join: SelfJoinPolicy,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl SessionLedger {
    pub fn new(settings: LedgerSettings) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            fees: FeeMeter::new(settings.admin, settings.fee_rate),
            notifier: EventNotifier::new(settings.channel_capacity),
            self_join: settings.self_join,
        }
    }

    pub fn admin(&self) -> &Identity {
        self.fees.admin()
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn self_join_policy(&self) -> SelfJoinPolicy {
        self.self_join
    }

    async fn entry(&self, id: SessionId) -> LedgerResult<Entry> {
        let sessions = self.sessions.read().await;
        usize::try_from(id)
            .ok()
            .and_then(|index| sessions.get(index))
            .cloned()
            .ok_or(LedgerError::SessionNotFound(id))
    }

    /// Stamp the next revision on `event`, apply it, and publish it.
    /// Must be called with the session's mutex held.
    fn commit(&self, session: &mut Session, event: LedgerEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            session_id: session.id,
            revision: session.revision + 1,
            event,
        };
        session.apply(&envelope);
        self.notifier.publish(envelope.clone());
        envelope
    }

    /// Open a new session with `creator` in seat A
    pub async fn create_session(&self, creator: Identity) -> SessionId {
        let mut sessions = self.sessions.write().await;
        let id = sessions.len() as SessionId;
        let session = Session::new(id, creator.clone(), now_secs());
        let created_at = session.created_at;
        sessions.push(Arc::new(Mutex::new(session)));

        // Nobody can reach the new entry before the vector lock is released,
        // so this is ordered before any later envelope for the session.
        self.notifier.publish(EventEnvelope {
            session_id: id,
            revision: 0,
            event: LedgerEvent::SessionCreated {
                creator: creator.clone(),
                created_at,
            },
        });

        info!(session_id = id, creator = %creator, "session created");
        id
    }

    /// Take seat B
    pub async fn join_session(&self, id: SessionId, joiner: &Identity) -> LedgerResult<Session> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if session.player_b.is_some() {
            return Err(ValidationError::AlreadyFull.into());
        }
        if !session.active {
            return Err(ValidationError::GameInactive.into());
        }
        if session.player_a == *joiner && self.self_join == SelfJoinPolicy::Reject {
            return Err(ValidationError::SelfJoin.into());
        }

        self.commit(
            &mut session,
            LedgerEvent::PlayerJoined {
                joiner: joiner.clone(),
            },
        );

        info!(session_id = id, joiner = %joiner, "player joined");
        Ok(session.clone())
    }

    /// Record a move by the player whose turn it is, charging the move fee.
    ///
    /// Trust boundary: `position` is stored verbatim. The ledger does not
    /// check that it is a legal continuation of the previous position, nor
    /// detect check, mate or draw; callers consult the legality oracle before
    /// submitting. The ledger guarantees only turn order, fee correctness and
    /// that ended sessions stay ended.
    pub async fn submit_move(
        &self,
        id: SessionId,
        caller: &Identity,
        from: &str,
        to: &str,
        position: &str,
        fee_paid: Amount,
    ) -> LedgerResult<Session> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if !session.active {
            return Err(ValidationError::GameInactive.into());
        }
        if session.player_to_move() != Some(caller) {
            return Err(ValidationError::NotYourTurn.into());
        }
        // Last fallible step: nothing has been touched if the fee is wrong
        self.fees.charge(fee_paid)?;

        let move_count = session.move_count + 1;
        let envelope = self.commit(
            &mut session,
            LedgerEvent::MoveAccepted {
                from: from.to_string(),
                to: to.to_string(),
                position: position.to_string(),
                move_count,
            },
        );

        info!(
            session_id = id,
            revision = envelope.revision,
            move_count,
            from,
            to,
            "move accepted"
        );
        Ok(session.clone())
    }

    /// End the session on behalf of a participant; the other seat wins
    pub async fn resign(&self, id: SessionId, caller: &Identity) -> LedgerResult<Session> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if !session.active {
            return Err(ValidationError::GameInactive.into());
        }
        if !session.is_participant(caller) {
            return Err(AuthorizationError::NotAParticipant.into());
        }

        let winner = session.opponent_of(caller).cloned();
        self.commit(
            &mut session,
            LedgerEvent::SessionEnded {
                winner: winner.clone(),
                reason: EndReason::Resignation,
            },
        );

        info!(
            session_id = id,
            resigned = %caller,
            winner = ?winner,
            "session ended by resignation"
        );
        Ok(session.clone())
    }

    /// Admin: end the session with no winner
    pub async fn terminate(&self, caller: &Identity, id: SessionId) -> LedgerResult<Session> {
        self.fees.ensure_admin(caller)?;
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if !session.active {
            return Err(ValidationError::GameInactive.into());
        }

        self.commit(
            &mut session,
            LedgerEvent::SessionEnded {
                winner: None,
                reason: EndReason::AdminTerminated,
            },
        );

        info!(session_id = id, "session terminated by admin");
        Ok(session.clone())
    }

    /// Admin: end the session naming a seated participant as winner, e.g.
    /// after the legality oracle reported checkmate
    pub async fn award(
        &self,
        caller: &Identity,
        id: SessionId,
        winner: &Identity,
    ) -> LedgerResult<Session> {
        self.fees.ensure_admin(caller)?;
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;

        if !session.active {
            return Err(ValidationError::GameInactive.into());
        }
        if !session.is_participant(winner) {
            return Err(AuthorizationError::NotAParticipant.into());
        }

        self.commit(
            &mut session,
            LedgerEvent::SessionEnded {
                winner: Some(winner.clone()),
                reason: EndReason::AdminAwarded,
            },
        );

        info!(session_id = id, winner = %winner, "session awarded by admin");
        Ok(session.clone())
    }

    /// Consistent snapshot of one session
    pub async fn get_session(&self, id: SessionId) -> LedgerResult<Session> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    /// Subscribe to a session, then snapshot it
    pub async fn watch(&self, id: SessionId) -> LedgerResult<Watch> {
        let entry = self.entry(id).await?;
        let events = self.notifier.subscribe(id);
        let snapshot = entry.lock().await.clone();
        if !snapshot.active {
            // Nothing more will be published for an ended session
            self.notifier.close(id);
        }
        Ok(Watch { snapshot, events })
    }

    /// Number of sessions ever created
    pub async fn session_count(&self) -> u64 {
        self.sessions.read().await.len() as u64
    }

    /// Snapshots of matching sessions in id order
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Vec<Session> {
        let entries: Vec<Entry> = self.sessions.read().await.clone();

        let mut matching = Vec::new();
        for entry in entries {
            let session = entry.lock().await;
            if filter.matches(&session) {
                matching.push(session.clone());
            }
        }
        matching
    }

    pub async fn leaderboard(&self) -> Vec<Standing> {
        let ended = self.list_sessions(&SessionFilter::Ended).await;
        leaderboard(&ended)
    }

    pub fn fee_account(&self) -> FeeAccount {
        self.fees.account()
    }

    pub fn set_rate(&self, caller: &Identity, rate: Amount) -> LedgerResult<()> {
        self.fees.set_rate(caller, rate)
    }

    pub fn withdraw(&self, caller: &Identity) -> LedgerResult<Amount> {
        self.fees.withdraw(caller)
    }
}
