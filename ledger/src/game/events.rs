use super::identity::Identity;
use super::SessionId;
use serde::{Deserialize, Serialize};

/// Why a session stopped being active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A participant resigned; the other participant (if any) wins
    Resignation,
    /// Admin ended the game without a winner
    AdminTerminated,
    /// Admin recorded a result observed by the legality oracle
    AdminAwarded,
}

/// Lifecycle events published by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    SessionCreated {
        creator: Identity,
        created_at: u64,
    },
    PlayerJoined {
        joiner: Identity,
    },
    MoveAccepted {
        from: String,
        to: String,
        /// Position after the move, stored verbatim
        position: String,
        /// Move count after the move
        move_count: u32,
    },
    SessionEnded {
        winner: Option<Identity>,
        reason: EndReason,
    },
}

/// An event tagged with the session it belongs to and the revision it produced.
///
/// Revisions are contiguous per session, so a subscriber holding revision `n`
/// can apply exactly the envelope carrying `n + 1` and must re-fetch a
/// snapshot on anything later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub session_id: SessionId,
    pub revision: u64,
    pub event: LedgerEvent,
}

impl LedgerEvent {
    /// Check if this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, LedgerEvent::SessionEnded { .. })
    }
}
