//! Rematch pairing between two independent clients.
//!
//! The ledger has no notion of a rematch. The initiator creates a fresh
//! session and shares its join code; the acceptor joins it. Each side runs
//! its own [`SyncAgent`] and considers the pairing done when that agent sees
//! the second seat filled. Nothing else is shared between them.

use super::{LedgerClient, SourceError, SyncAgent, SyncConfig, SyncHandle, Transition};
use crate::codec::{self, JoinCode};
use crate::error::ValidationError;
use crate::game::{Identity, Session, SessionId};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RematchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Code(#[from] ValidationError),
    /// The new session ended before both seats were filled
    #[error("session {0} ended before the rematch was paired")]
    Ended(SessionId),
    /// The agent stopped before pairing completed
    #[error("sync agent for session {0} stopped")]
    Stopped(SessionId),
}

impl RematchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RematchError::Source(e) if e.is_retryable())
    }
}

/// A paired session and the agent that keeps following it
pub struct Paired {
    pub session: Session,
    pub opponent: Identity,
    pub handle: SyncHandle,
}

/// Initiator side: a freshly created session waiting for its opponent
pub struct RematchOffer {
    initiator: Identity,
    code: JoinCode,
    handle: SyncHandle,
}

impl RematchOffer {
    /// Create the new session and start watching it
    pub async fn create<C>(
        client: Arc<C>,
        initiator: &Identity,
        config: SyncConfig,
    ) -> Result<Self, RematchError>
    where
        C: LedgerClient + ?Sized,
    {
        let session_id = client.create_session(initiator).await?;
        let code = codec::encode(session_id)?;
        info!(session_id, code = %code, initiator = %initiator, "rematch offered");

        Ok(Self {
            initiator: initiator.clone(),
            code,
            handle: SyncAgent::spawn(client, session_id, config),
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.handle.session_id()
    }

    pub fn code(&self) -> &JoinCode {
        &self.code
    }

    /// Challenge link for the opponent, e.g. `https://host/play?code=00002S`
    pub fn link(&self, base_url: &str) -> Result<String, ValidationError> {
        codec::challenge_link(base_url, self.session_id())
    }

    /// Wait until someone takes the second seat
    pub async fn accepted(self) -> Result<Paired, RematchError> {
        let RematchOffer {
            initiator,
            handle,
            ..
        } = self;
        let paired = wait_for_opponent(handle, &initiator).await?;
        info!(
            session_id = paired.session.id,
            initiator = %initiator,
            opponent = %paired.opponent,
            "rematch accepted"
        );
        Ok(paired)
    }

    /// Withdraw the offer. The session itself stays open on the ledger.
    pub async fn cancel(self) {
        self.handle.cancel().await;
    }
}

/// Acceptor side: resolve the shared code or link, join, and wait until the
/// local agent sees the two-player state.
pub async fn accept_rematch<C>(
    client: Arc<C>,
    challenge: &str,
    acceptor: &Identity,
    config: SyncConfig,
) -> Result<Paired, RematchError>
where
    C: LedgerClient + ?Sized,
{
    let session_id = codec::parse_challenge(challenge)?;

    // Start following before joining so the join is observed as a transition
    let handle = SyncAgent::spawn(client.clone(), session_id, config);
    client.join_session(session_id, acceptor).await?;
    info!(session_id, acceptor = %acceptor, "joined rematch");

    wait_for_opponent(handle, acceptor).await
}

/// Wait for the second seat to fill; `local` is the identity this side plays as
async fn wait_for_opponent(
    mut handle: SyncHandle,
    local: &Identity,
) -> Result<Paired, RematchError> {
    let session_id = handle.session_id();
    while let Some(transition) = handle.next_transition().await {
        match transition {
            Transition::OpponentJoined {
                player_a, player_b, ..
            } => {
                let opponent = if player_a == *local { player_b } else { player_a };
                let session = handle
                    .session()
                    .ok_or(RematchError::Stopped(session_id))?;
                return Ok(Paired {
                    session,
                    opponent,
                    handle,
                });
            }
            Transition::GameEnded { .. } => return Err(RematchError::Ended(session_id)),
            Transition::MoveObserved { .. } => {}
        }
    }
    Err(RematchError::Stopped(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::ledger::{LedgerSettings, SessionLedger};
    use std::time::Duration;
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

    async fn ledger_after_first_game() -> Arc<SessionLedger> {
        let ledger = Arc::new(SessionLedger::new(LedgerSettings::new(id("owner"))));
        let first = ledger.create_session(id("alice")).await;
        ledger.join_session(first, &id("bob")).await.unwrap();
        ledger.resign(first, &id("bob")).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_both_sides_observe_pairing() {
        let ledger = ledger_after_first_game().await;

        let offer = RematchOffer::create(ledger.clone(), &id("alice"), fast())
            .await
            .unwrap();
        assert_eq!(offer.session_id(), 1);
        assert_eq!(offer.code().as_str(), "000001");

        let link = offer.link("https://onchess.example/play").unwrap();
        let waiting = tokio::spawn(offer.accepted());

        let mut acceptor = timeout(
            Duration::from_secs(2),
            accept_rematch(ledger.clone(), &link, &id("bob"), fast()),
        )
        .await
        .unwrap()
        .unwrap();
        let mut initiator = timeout(Duration::from_secs(2), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(initiator.opponent, id("bob"));
        assert_eq!(acceptor.opponent, id("alice"));
        assert_eq!(initiator.session.player_a, id("alice"));
        assert_eq!(acceptor.session.id, 1);

        // The join is reported exactly once on each side
        assert!(timeout(Duration::from_millis(100), initiator.handle.next_transition())
            .await
            .is_err());
        assert!(timeout(Duration::from_millis(100), acceptor.handle.next_transition())
            .await
            .is_err());

        // The old session is untouched
        assert!(!ledger.get_session(0).await.unwrap().active);
    }

    #[tokio::test]
    async fn test_pairing_over_bare_lowercase_code() {
        let ledger = ledger_after_first_game().await;
        let offer = RematchOffer::create(ledger.clone(), &id("bob"), fast())
            .await
            .unwrap();
        let code = offer.code().as_str().to_ascii_lowercase();

        let paired = accept_rematch(ledger.clone(), &code, &id("alice"), fast())
            .await
            .unwrap();
        assert_eq!(paired.session.player_b, Some(id("alice")));
        assert_eq!(paired.opponent, id("bob"));

        let initiator = offer.accepted().await.unwrap();
        assert_eq!(initiator.opponent, id("alice"));
    }

    #[tokio::test]
    async fn test_second_acceptor_is_turned_away() {
        let ledger = ledger_after_first_game().await;
        let offer = RematchOffer::create(ledger.clone(), &id("alice"), fast())
            .await
            .unwrap();
        let code = offer.code().to_string();

        accept_rematch(ledger.clone(), &code, &id("bob"), fast())
            .await
            .unwrap();
        let late = accept_rematch(ledger.clone(), &code, &id("carol"), fast()).await;
        assert_eq!(
            late.err(),
            Some(RematchError::Source(SourceError::Rejected(
                LedgerError::Validation(ValidationError::AlreadyFull)
            )))
        );
    }

    #[tokio::test]
    async fn test_bad_challenge_is_rejected_before_any_call() {
        let ledger = ledger_after_first_game().await;
        let result = accept_rematch(ledger.clone(), "???", &id("bob"), fast()).await;
        assert!(matches!(
            result,
            Err(RematchError::Code(ValidationError::InvalidJoinCode(_)))
        ));
        assert_eq!(ledger.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_offer_ended_before_pairing() {
        let ledger = ledger_after_first_game().await;
        let offer = RematchOffer::create(ledger.clone(), &id("alice"), fast())
            .await
            .unwrap();
        let session_id = offer.session_id();
        let waiting = tokio::spawn(offer.accepted());

        ledger.resign(session_id, &id("alice")).await.unwrap();
        let result = timeout(Duration::from_secs(2), waiting).await.unwrap().unwrap();
        assert_eq!(result.err(), Some(RematchError::Ended(session_id)));
    }
}
