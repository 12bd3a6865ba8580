use super::identity::Identity;
use super::state::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Win/loss tally for one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    pub identity: Identity,
    pub wins: u32,
    pub games: u32,
}

impl Standing {
    /// Win rate as a percentage, 0 when no games were counted
    pub fn win_rate(&self) -> f64 {
        if self.games == 0 {
            return 0.0;
        }
        f64::from(self.wins) * 100.0 / f64::from(self.games)
    }
}

/// Build a leaderboard from decided games.
///
/// Only ended sessions carrying a winner count; games ended without a winner
/// are skipped entirely. The losing participant is credited with a game.
/// Sorted by wins descending, then by identity for a stable order.
pub fn leaderboard<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Vec<Standing> {
    let mut stats: HashMap<Identity, (u32, u32)> = HashMap::new();

    for session in sessions {
        if session.active {
            continue;
        }
        let Some(winner) = &session.winner else {
            continue;
        };

        let entry = stats.entry(winner.clone()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += 1;

        if let Some(loser) = session.opponent_of(winner) {
            stats.entry(loser.clone()).or_insert((0, 0)).1 += 1;
        }
    }

    let mut standings: Vec<Standing> = stats
        .into_iter()
        .map(|(identity, (wins, games))| Standing {
            identity,
            wins,
            games,
        })
        .collect();

    standings.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.identity.cmp(&b.identity)));
    standings
}
