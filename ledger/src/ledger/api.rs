use super::{SelfJoinPolicy, SessionFilter, SessionLedger, Watch};
use crate::codec;
use crate::error::{LedgerError, ValidationError};
use crate::fees::Amount;
use crate::game::{Identity, Session, SessionId, Standing};
use crate::sync::Push;
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// HTTP API state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<SessionLedger>,
    pub started: Instant,
}

impl ApiState {
    pub fn new(ledger: Arc<SessionLedger>) -> Self {
        Self {
            ledger,
            started: Instant::now(),
        }
    }
}

// ============= Request Types =============

/// Identities arrive as plain strings so a bad one is reported in the
/// ledger's own error shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub creator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerRequest {
    pub caller: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRequest {
    pub caller: String,
    pub from: String,
    pub to: String,
    pub position: String,
    #[serde(default)]
    pub fee: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardRequest {
    pub caller: String,
    pub winner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRateRequest {
    pub caller: String,
    pub rate: Amount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    /// `all`, `open`, `active` or `ended`
    pub filter: Option<String>,
    /// Only sessions this identity sits in; takes precedence over `filter`
    pub player: Option<String>,
}

// ============= Response Types =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub id: SessionId,
    /// Absent once ids outgrow the join code range
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub sessions: Vec<Session>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesResponse {
    pub admin: Identity,
    pub rate_per_move: Amount,
    pub accumulated: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub amount: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardResponse {
    pub standings: Vec<Standing>,
}

/// Status response showing ledger state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_count: u64,
    pub rate_per_move: Amount,
    pub self_join: SelfJoinPolicy,
    pub uptime_secs: u64,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    /// Ledger rejections never clear by retrying the same request
    pub retryable: bool,
    /// Session ended, or the code can never resolve
    pub terminal: bool,
    pub detail: LedgerError,
}

impl From<&LedgerError> for ErrorBody {
    fn from(err: &LedgerError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
            retryable: false,
            terminal: err.is_terminal(),
            detail: err.clone(),
        }
    }
}

/// A rejected request, rendered as [`ErrorBody`]
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl<E: Into<LedgerError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Authorization(_) => StatusCode::FORBIDDEN,
        LedgerError::Validation(
            ValidationError::InvalidIdentity(_) | ValidationError::InvalidJoinCode(_),
        ) => StatusCode::BAD_REQUEST,
        LedgerError::Validation(_) => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        debug!(code = self.0.code(), %status, "request rejected");
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn identity(raw: &str) -> Result<Identity, ApiError> {
    Ok(Identity::parse(raw)?)
}

/// Create the HTTP API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/sessions", post(handle_create).get(handle_list))
        .route("/sessions/:id", get(handle_get))
        .route("/sessions/:id/join", post(handle_join))
        .route("/sessions/:id/moves", post(handle_move))
        .route("/sessions/:id/resign", post(handle_resign))
        .route("/sessions/:id/terminate", post(handle_terminate))
        .route("/sessions/:id/award", post(handle_award))
        .route("/sessions/:id/ws", get(handle_watch))
        .route("/codes/:code", get(handle_get_by_code))
        .route("/fees", get(handle_fees))
        .route("/fees/rate", post(handle_set_rate))
        .route("/fees/withdraw", post(handle_withdraw))
        .route("/leaderboard", get(handle_leaderboard))
        .route("/status", get(handle_status))
        .layer(CorsLayer::permissive()) // Enable CORS for the board frontend
        .with_state(state)
}

async fn handle_create(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let creator = identity(&req.creator)?;
    let id = state.ledger.create_session(creator).await;
    let code = codec::encode(id).ok().map(|code| code.to_string());
    Ok((StatusCode::CREATED, Json(CreateSessionResponse { id, code })))
}

async fn handle_list(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<SessionsResponse> {
    let filter = match (&query.player, query.filter.as_deref()) {
        (Some(player), _) => SessionFilter::Player(identity(player)?),
        (None, None | Some("all")) => SessionFilter::All,
        (None, Some("open")) => SessionFilter::Open,
        (None, Some("active")) => SessionFilter::Active,
        (None, Some("ended")) => SessionFilter::Ended,
        // Unknown filters list everything rather than fail
        (None, Some(other)) => {
            debug!(filter = other, "unknown session filter");
            SessionFilter::All
        }
    };

    let sessions = state.ledger.list_sessions(&filter).await;
    let count = sessions.len();
    Ok(Json(SessionsResponse { sessions, count }))
}

async fn handle_get(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
) -> ApiResult<Session> {
    Ok(Json(state.ledger.get_session(id).await?))
}

async fn handle_get_by_code(
    State(state): State<ApiState>,
    Path(code): Path<String>,
) -> ApiResult<Session> {
    let id = codec::decode(&code)?;
    Ok(Json(state.ledger.get_session(id).await?))
}

async fn handle_join(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Session> {
    let joiner = identity(&req.caller)?;
    Ok(Json(state.ledger.join_session(id, &joiner).await?))
}

async fn handle_move(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<Session> {
    let caller = identity(&req.caller)?;
    let session = state
        .ledger
        .submit_move(id, &caller, &req.from, &req.to, &req.position, req.fee)
        .await?;
    Ok(Json(session))
}

async fn handle_resign(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Session> {
    let caller = identity(&req.caller)?;
    Ok(Json(state.ledger.resign(id, &caller).await?))
}

async fn handle_terminate(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<Session> {
    let caller = identity(&req.caller)?;
    Ok(Json(state.ledger.terminate(&caller, id).await?))
}

async fn handle_award(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    Json(req): Json<AwardRequest>,
) -> ApiResult<Session> {
    let caller = identity(&req.caller)?;
    let winner = identity(&req.winner)?;
    Ok(Json(state.ledger.award(&caller, id, &winner).await?))
}

async fn handle_fees(State(state): State<ApiState>) -> Json<FeesResponse> {
    let account = state.ledger.fee_account();
    Json(FeesResponse {
        admin: state.ledger.admin().clone(),
        rate_per_move: account.rate_per_move,
        accumulated: account.accumulated,
    })
}

async fn handle_set_rate(
    State(state): State<ApiState>,
    Json(req): Json<SetRateRequest>,
) -> ApiResult<FeesResponse> {
    let caller = identity(&req.caller)?;
    state.ledger.set_rate(&caller, req.rate)?;
    Ok(handle_fees(State(state)).await)
}

async fn handle_withdraw(
    State(state): State<ApiState>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<WithdrawResponse> {
    let caller = identity(&req.caller)?;
    let amount = state.ledger.withdraw(&caller)?;
    Ok(Json(WithdrawResponse { amount }))
}

async fn handle_leaderboard(State(state): State<ApiState>) -> Json<LeaderboardResponse> {
    Json(LeaderboardResponse {
        standings: state.ledger.leaderboard().await,
    })
}

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session_count: state.ledger.session_count().await,
        rate_per_move: state.ledger.fee_account().rate_per_move,
        self_join: state.ledger.self_join_policy(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// Handle WebSocket upgrade for a session feed. Unknown ids are refused
/// before upgrading.
async fn handle_watch(
    State(state): State<ApiState>,
    Path(id): Path<SessionId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let watch = state.ledger.watch(id).await?;
    Ok(ws.on_upgrade(move |socket| push_session(socket, id, watch)))
}

async fn send_push(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    push: &Push,
) -> bool {
    match serde_json::to_string(push) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(_) => false,
    }
}

/// Snapshot first, then every envelope, until the session ends or the peer
/// goes away
async fn push_session(socket: WebSocket, session_id: SessionId, watch: Watch) {
    info!(session_id, "session feed connected");

    let (mut sender, mut receiver) = socket.split();
    let Watch {
        snapshot,
        mut events,
    } = watch;
    let mut finished = !snapshot.active;

    if send_push(&mut sender, &Push::Snapshot { session: snapshot }).await {
        while !finished {
            tokio::select! {
                received = events.recv() => {
                    let push = match received {
                        Ok(envelope) => {
                            finished = envelope.event.is_terminal();
                            Push::Event { envelope }
                        }
                        Err(RecvError::Lagged(missed)) => Push::Lagged { missed },
                        Err(RecvError::Closed) => break,
                    };
                    if !send_push(&mut sender, &push).await {
                        break;
                    }
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(session_id, "session feed closed");
}

/// Start the HTTP API server
pub async fn start_api_server(ledger: Arc<SessionLedger>, addr: String) -> Result<()> {
    let app = create_router(ApiState::new(ledger));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "ledger API listening");

    axum::serve(listener, app).await?;

    Ok(())
}
