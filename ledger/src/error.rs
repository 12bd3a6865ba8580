use crate::game::SessionId;
use serde::{Deserialize, Serialize};

/// Request was well-formed but violates a lifecycle or codec rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum ValidationError {
    #[error("not your turn")]
    NotYourTurn,
    #[error("game is not active")]
    GameInactive,
    #[error("incorrect fee: expected {expected}, paid {paid}")]
    IncorrectFee { expected: u128, paid: u128 },
    #[error("game already has two players")]
    AlreadyFull,
    #[error("creator may not join their own game")]
    SelfJoin,
    #[error("session id {0} cannot be represented as a join code")]
    CodeUnrepresentable(SessionId),
    #[error("invalid join code: {0}")]
    InvalidJoinCode(String),
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Caller is not allowed to perform the operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum AuthorizationError {
    #[error("caller is not the ledger admin")]
    NotAdmin,
    #[error("caller is not a participant in this game")]
    NotAParticipant,
}

/// Every way a ledger operation can be rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
}

impl LedgerError {
    /// Stable machine-readable name, used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(e) => match e {
                ValidationError::NotYourTurn => "not_your_turn",
                ValidationError::GameInactive => "game_inactive",
                ValidationError::IncorrectFee { .. } => "incorrect_fee",
                ValidationError::AlreadyFull => "already_full",
                ValidationError::SelfJoin => "self_join",
                ValidationError::CodeUnrepresentable(_) => "code_unrepresentable",
                ValidationError::InvalidJoinCode(_) => "invalid_join_code",
                ValidationError::InvalidIdentity(_) => "invalid_identity",
            },
            LedgerError::Authorization(AuthorizationError::NotAdmin) => "not_admin",
            LedgerError::Authorization(AuthorizationError::NotAParticipant) => "not_a_participant",
            LedgerError::SessionNotFound(_) => "session_not_found",
        }
    }

    /// True when retrying can never succeed: the session is over or the
    /// code itself is unusable.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LedgerError::Validation(
                ValidationError::GameInactive
                    | ValidationError::CodeUnrepresentable(_)
                    | ValidationError::InvalidJoinCode(_)
            )
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
