pub mod events;
pub mod identity;
pub mod standings;
pub mod state;

/// Session ids are assigned by the ledger, strictly increasing from 0
pub type SessionId = u64;

pub use events::{EndReason, EventEnvelope, LedgerEvent};
pub use identity::{Identity, UNSET_SENTINEL};
pub use standings::{leaderboard, Standing};
pub use state::{LastMove, Session, Side, START_POSITION};
