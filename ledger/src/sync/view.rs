use crate::game::{EndReason, EventEnvelope, Identity, LastMove, Session, SessionId};
use serde::{Deserialize, Serialize};

/// Observer-facing change detected while reconciling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Seat B went from empty to filled
    OpponentJoined {
        session_id: SessionId,
        player_a: Identity,
        player_b: Identity,
    },
    /// One or more moves landed since the last view
    MoveObserved {
        session_id: SessionId,
        move_count: u32,
        last_move: Option<LastMove>,
    },
    /// The session became inactive
    GameEnded {
        session_id: SessionId,
        winner: Option<Identity>,
        reason: Option<EndReason>,
    },
}

/// Outcome of offering a pushed envelope to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Contiguous delta, view advanced
    Advanced(Vec<Transition>),
    /// Already reflected in the view
    Duplicate,
    /// Intermediate envelopes were missed; fetch a snapshot instead
    Gap { have: Option<u64>, got: u64 },
}

/// Local mirror of one session.
///
/// Transitions are derived by diffing the old view against the new one, so
/// replays, duplicate envelopes and overlapping push/poll deliveries can never
/// report the same change twice. An empty view counts as "no opponent, still
/// active".
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    cached: Option<Session>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Option<&Session> {
        self.cached.as_ref()
    }

    pub fn revision(&self) -> Option<u64> {
        self.cached.as_ref().map(|s| s.revision)
    }

    /// Ended sessions never change again
    pub fn is_terminal(&self) -> bool {
        self.cached.as_ref().is_some_and(|s| !s.active)
    }

    /// Merge a fetched snapshot. Snapshots not newer than the view are ignored.
    pub fn reconcile(&mut self, snapshot: Session) -> Vec<Transition> {
        if let Some(cached) = &self.cached {
            if snapshot.revision <= cached.revision {
                return Vec::new();
            }
        }

        let transitions = diff(self.cached.as_ref(), &snapshot);
        self.cached = Some(snapshot);
        transitions
    }

    /// Apply a pushed envelope if it is the next revision
    pub fn apply_event(&mut self, envelope: &EventEnvelope) -> Applied {
        let Some(cached) = &self.cached else {
            return Applied::Gap {
                have: None,
                got: envelope.revision,
            };
        };

        if envelope.session_id != cached.id || envelope.revision <= cached.revision {
            return Applied::Duplicate;
        }
        if envelope.revision != cached.revision + 1 {
            return Applied::Gap {
                have: Some(cached.revision),
                got: envelope.revision,
            };
        }

        let mut next = cached.clone();
        next.apply(envelope);
        let transitions = diff(Some(cached), &next);
        self.cached = Some(next);
        Applied::Advanced(transitions)
    }
}

fn diff(old: Option<&Session>, new: &Session) -> Vec<Transition> {
    let mut transitions = Vec::new();

    let had_opponent = old.is_some_and(|s| s.player_b.is_some());
    if let (false, Some(player_b)) = (had_opponent, &new.player_b) {
        transitions.push(Transition::OpponentJoined {
            session_id: new.id,
            player_a: new.player_a.clone(),
            player_b: player_b.clone(),
        });
    }

    let seen_moves = old.map_or(0, |s| s.move_count);
    if new.move_count > seen_moves {
        transitions.push(Transition::MoveObserved {
            session_id: new.id,
            move_count: new.move_count,
            last_move: new.last_move.clone(),
        });
    }

    let was_active = old.map_or(true, |s| s.active);
    if was_active && !new.active {
        transitions.push(Transition::GameEnded {
            session_id: new.id,
            winner: new.winner.clone(),
            reason: new.end_reason,
        });
    }

    transitions
}
