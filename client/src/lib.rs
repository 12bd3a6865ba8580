//! Remote access to a ledger server.
//!
//! [`HttpLedger`] speaks the ledger's JSON API over `reqwest` and its
//! session feed over `tokio-tungstenite`, and implements the sync traits so
//! the same [`SyncAgent`](onchess_ledger::SyncAgent) and rematch flow used
//! in-process also work across the network.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use onchess_ledger::ledger::api::{
    AwardRequest, CallerRequest, CreateSessionRequest, CreateSessionResponse, FeesResponse,
    LeaderboardResponse, ListQuery, MoveRequest, SessionsResponse, SetRateRequest,
    StatusResponse, WithdrawResponse,
};
use onchess_ledger::{
    Amount, ErrorBody, Identity, LedgerClient, LedgerSource, Push, PushStream, Session,
    SessionId, SourceError,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one ledger server
#[derive(Debug, Clone)]
pub struct HttpLedger {
    base_url: String,
    http: reqwest::Client,
}

fn transient(err: impl std::fmt::Display) -> SourceError {
    SourceError::Transient(err.to_string())
}

/// Failure without a ledger error body
fn classify_failure(status: reqwest::StatusCode, text: String) -> SourceError {
    if status.is_client_error() {
        SourceError::Refused {
            status: status.as_u16(),
            message: text,
        }
    } else {
        SourceError::Transient(format!("ledger returned {status}"))
    }
}

impl HttpLedger {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `ws://` or `wss://` address of a session feed
    pub fn feed_url(&self, session_id: SessionId) -> String {
        let base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{base}/sessions/{session_id}/ws")
    }

    /// Send a request, decoding either the success body or the ledger's
    /// rejection. Other 4xx responses are refusals; connectivity, 5xx and
    /// garbled success bodies are transient.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = request.send().await.map_err(transient)?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(transient);
        }

        let text = response.text().await.map_err(transient)?;
        if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
            return Err(SourceError::Rejected(body.detail));
        }
        Err(classify_failure(status, text))
    }

    pub async fn create(&self, creator: &Identity) -> Result<CreateSessionResponse, SourceError> {
        let body = CreateSessionRequest {
            creator: creator.to_string(),
        };
        self.send(self.http.post(self.url("/sessions")).json(&body))
            .await
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<Session, SourceError> {
        self.send(self.http.get(self.url(&format!("/sessions/{session_id}"))))
            .await
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Session, SourceError> {
        self.send(self.http.get(self.url(&format!("/codes/{code}"))))
            .await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<SessionsResponse, SourceError> {
        self.send(self.http.get(self.url("/sessions")).query(query))
            .await
    }

    pub async fn join(
        &self,
        session_id: SessionId,
        joiner: &Identity,
    ) -> Result<Session, SourceError> {
        let body = CallerRequest {
            caller: joiner.to_string(),
        };
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{session_id}/join")))
                .json(&body),
        )
        .await
    }

    pub async fn submit_move(
        &self,
        session_id: SessionId,
        caller: &Identity,
        from: &str,
        to: &str,
        position: &str,
        fee: Amount,
    ) -> Result<Session, SourceError> {
        let body = MoveRequest {
            caller: caller.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            position: position.to_string(),
            fee,
        };
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{session_id}/moves")))
                .json(&body),
        )
        .await
    }

    pub async fn resign(
        &self,
        session_id: SessionId,
        caller: &Identity,
    ) -> Result<Session, SourceError> {
        let body = CallerRequest {
            caller: caller.to_string(),
        };
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{session_id}/resign")))
                .json(&body),
        )
        .await
    }

    pub async fn terminate(
        &self,
        caller: &Identity,
        session_id: SessionId,
    ) -> Result<Session, SourceError> {
        let body = CallerRequest {
            caller: caller.to_string(),
        };
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{session_id}/terminate")))
                .json(&body),
        )
        .await
    }

    pub async fn award(
        &self,
        caller: &Identity,
        session_id: SessionId,
        winner: &Identity,
    ) -> Result<Session, SourceError> {
        let body = AwardRequest {
            caller: caller.to_string(),
            winner: winner.to_string(),
        };
        self.send(
            self.http
                .post(self.url(&format!("/sessions/{session_id}/award")))
                .json(&body),
        )
        .await
    }

    pub async fn fees(&self) -> Result<FeesResponse, SourceError> {
        self.send(self.http.get(self.url("/fees"))).await
    }

    pub async fn set_rate(
        &self,
        caller: &Identity,
        rate: Amount,
    ) -> Result<FeesResponse, SourceError> {
        let body = SetRateRequest {
            caller: caller.to_string(),
            rate,
        };
        self.send(self.http.post(self.url("/fees/rate")).json(&body))
            .await
    }

    pub async fn withdraw(&self, caller: &Identity) -> Result<Amount, SourceError> {
        let body = CallerRequest {
            caller: caller.to_string(),
        };
        let response: WithdrawResponse = self
            .send(self.http.post(self.url("/fees/withdraw")).json(&body))
            .await?;
        Ok(response.amount)
    }

    pub async fn leaderboard(&self) -> Result<LeaderboardResponse, SourceError> {
        self.send(self.http.get(self.url("/leaderboard"))).await
    }

    pub async fn status(&self) -> Result<StatusResponse, SourceError> {
        self.send(self.http.get(self.url("/status"))).await
    }
}

#[async_trait]
impl LedgerSource for HttpLedger {
    async fn fetch(&self, session_id: SessionId) -> Result<Session, SourceError> {
        self.get_session(session_id).await
    }

    async fn subscribe(&self, session_id: SessionId) -> Result<Option<PushStream>, SourceError> {
        let feed_url = self.feed_url(session_id);
        let (ws_stream, _) = timeout(REQUEST_TIMEOUT, connect_async(&feed_url))
            .await
            .map_err(|_| SourceError::Transient(format!("timed out connecting to {feed_url}")))?
            .map_err(transient)?;
        debug!(session_id, %feed_url, "session feed connected");

        let pushes = stream::unfold(ws_stream, move |mut ws_stream| async move {
            loop {
                match ws_stream.next().await? {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Push>(&text) {
                        Ok(push) => return Some((push, ws_stream)),
                        Err(e) => warn!(session_id, error = %e, "unreadable feed frame"),
                    },
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(session_id, error = %e, "session feed error");
                        return None;
                    }
                }
            }
        });

        Ok(Some(pushes.boxed()))
    }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn create_session(&self, creator: &Identity) -> Result<SessionId, SourceError> {
        Ok(self.create(creator).await?.id)
    }

    async fn join_session(
        &self,
        session_id: SessionId,
        joiner: &Identity,
    ) -> Result<Session, SourceError> {
        self.join(session_id, joiner).await
    }
}
