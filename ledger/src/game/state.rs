use super::events::{EndReason, EventEnvelope, LedgerEvent};
use super::identity::Identity;
use super::SessionId;
use serde::{Deserialize, Serialize};

/// Initial position every session starts from
pub const START_POSITION: &str = "startpos";

/// Which seat moves next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    /// Side to move after `move_count` accepted moves
    pub fn for_move_count(move_count: u32) -> Self {
        if move_count % 2 == 0 {
            Side::A
        } else {
            Side::B
        }
    }
}

/// Most recent accepted move, in the caller's notation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMove {
    pub from: String,
    pub to: String,
}

/// One two-player game tracked by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub player_a: Identity,
    pub player_b: Option<Identity>,
    /// Opaque position string as submitted by the mover. Never validated.
    pub position: String,
    pub turn: Side,
    pub active: bool,
    pub winner: Option<Identity>,
    pub end_reason: Option<EndReason>,
    pub created_at: u64,
    pub move_count: u32,
    pub last_move: Option<LastMove>,
    /// Number of accepted operations since creation
    pub revision: u64,
}

impl Session {
    pub fn new(id: SessionId, creator: Identity, created_at: u64) -> Self {
        Self {
            id,
            player_a: creator,
            player_b: None,
            position: START_POSITION.to_string(),
            turn: Side::A,
            active: true,
            winner: None,
            end_reason: None,
            created_at,
            move_count: 0,
            last_move: None,
            revision: 0,
        }
    }

    /// Identity seated on `side`, if any
    pub fn player(&self, side: Side) -> Option<&Identity> {
        match side {
            Side::A => Some(&self.player_a),
            Side::B => self.player_b.as_ref(),
        }
    }

    /// Identity whose turn it is, if that seat is filled
    pub fn player_to_move(&self) -> Option<&Identity> {
        self.player(self.turn)
    }

    pub fn is_participant(&self, identity: &Identity) -> bool {
        self.player_a == *identity || self.player_b.as_ref() == Some(identity)
    }

    /// The participant opposite `identity`, if one is seated and distinct
    pub fn opponent_of(&self, identity: &Identity) -> Option<&Identity> {
        if self.player_a == *identity {
            self.player_b.as_ref().filter(|b| *b != identity)
        } else if self.player_b.as_ref() == Some(identity) {
            Some(&self.player_a).filter(|a| *a != identity)
        } else {
            None
        }
    }

    pub fn is_open(&self) -> bool {
        self.active && self.player_b.is_none()
    }

    /// Apply an already-validated event and advance the revision.
    ///
    /// The ledger and every client mirror go through this one function, so a
    /// mirror that applies the same contiguous envelopes ends up equal to the
    /// authoritative record. `SessionCreated` is the initial state and is a
    /// no-op here.
    pub fn apply(&mut self, envelope: &EventEnvelope) {
        self.revision = envelope.revision;

        match &envelope.event {
            LedgerEvent::SessionCreated { .. } => {}

            LedgerEvent::PlayerJoined { joiner } => {
                self.player_b = Some(joiner.clone());
            }

            LedgerEvent::MoveAccepted {
                from,
                to,
                position,
                move_count,
            } => {
                self.position = position.clone();
                self.move_count = *move_count;
                self.turn = Side::for_move_count(*move_count);
                self.last_move = Some(LastMove {
                    from: from.clone(),
                    to: to.clone(),
                });
            }

            LedgerEvent::SessionEnded { winner, reason } => {
                self.active = false;
                self.winner = winner.clone();
                self.end_reason = Some(*reason);
            }
        }
    }
}
