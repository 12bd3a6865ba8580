//! In-process binding of the sync traits to a [`SessionLedger`].

use super::{LedgerClient, LedgerSource, Push, PushStream, SourceError};
use crate::game::{Identity, Session, SessionId};
use crate::ledger::SessionLedger;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast::error::RecvError;

#[async_trait]
impl LedgerSource for SessionLedger {
    async fn fetch(&self, session_id: SessionId) -> Result<Session, SourceError> {
        Ok(self.get_session(session_id).await?)
    }

    async fn subscribe(&self, session_id: SessionId) -> Result<Option<PushStream>, SourceError> {
        let watch = self.watch(session_id).await?;

        let snapshot = stream::once(async move {
            Push::Snapshot {
                session: watch.snapshot,
            }
        });
        let events = stream::unfold(watch.events, |mut rx| async move {
            match rx.recv().await {
                Ok(envelope) => Some((Push::Event { envelope }, rx)),
                Err(RecvError::Lagged(missed)) => Some((Push::Lagged { missed }, rx)),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(Some(snapshot.chain(events).boxed()))
    }
}

#[async_trait]
impl LedgerClient for SessionLedger {
    async fn create_session(&self, creator: &Identity) -> Result<SessionId, SourceError> {
        Ok(SessionLedger::create_session(self, creator.clone()).await)
    }

    async fn join_session(
        &self,
        session_id: SessionId,
        joiner: &Identity,
    ) -> Result<Session, SourceError> {
        Ok(SessionLedger::join_session(self, session_id, joiner).await?)
    }
}
