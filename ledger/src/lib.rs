// Library interface for sharing the ledger, its codecs and the sync agent
// between the server and client binaries

pub mod codec;
pub mod config;
pub mod error;
pub mod fees;
pub mod game;
pub mod ledger;
pub mod sync;

// Re-export commonly used types for convenience
pub use codec::{challenge_link, parse_challenge, JoinCode};
pub use config::LedgerConfig;
pub use error::{AuthorizationError, LedgerError, LedgerResult, ValidationError};
pub use fees::{Amount, FeeAccount, FeeMeter};
pub use game::{EndReason, EventEnvelope, Identity, LedgerEvent, Session, SessionId, Side};
pub use ledger::api::{create_router, start_api_server, ApiState, ErrorBody};
pub use ledger::{LedgerSettings, SelfJoinPolicy, SessionFilter, SessionLedger};
pub use sync::{
    accept_rematch, LedgerClient, LedgerSource, Push, PushStream, RematchOffer, SourceError,
    SyncAgent, SyncConfig, SyncHandle, Transition,
};
