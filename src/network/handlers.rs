//! HTTP handlers.
//!
//! Each handler resolves authorization and request shape first, then calls
//! one domain operation, then notifies. Errors from every layer convert into
//! [`ApiError`], which owns the status mapping.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::game::catalog::{Catalog, TWITCHCON_TRAIL_ITEM};
use crate::game::launch::{LaunchError, LaunchQueue};
use crate::game::ledger::{Ledger, LedgerError};
use crate::game::purchase::{PurchaseEngine, PurchaseError};
use crate::game::reward::{RewardEngine, RewardError};
use crate::game::usage::UsageTracker;
use crate::network::auth::{
    require_channel, verify_extension_token, AuthConfig, AuthError, ExtensionClaims,
};
use crate::network::dispatch::{DispatchError, Dispatcher};
use crate::network::protocol::{
    parse_body, parse_body_or_default, parse_user_updates, DeleteLaunchesRequest, HealthResponse,
    LevelStartedRequest, LevelStartedResponse, LogTransactionRequest, Notification, ProtocolError,
    RequestQuery, UnlockRequest, UnlockResponse,
};
use crate::network::trust::TrustIssuer;
use crate::store::StoreError;

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    /// Extension token settings.
    pub auth: AuthConfig,
    /// Trust hash issuer.
    pub trust: TrustIssuer,
    /// Player ledger.
    pub ledger: Ledger,
    /// Store catalog.
    pub catalog: Catalog,
    /// Point purchases.
    pub purchases: PurchaseEngine,
    /// Bits rewards.
    pub rewards: RewardEngine,
    /// Launch queue.
    pub launches: LaunchQueue,
    /// Usage telemetry.
    pub usage: UsageTracker,
    /// Outbound notifications.
    pub dispatcher: Dispatcher,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Request failures, one variant per response class.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request or rejected business input (400).
    #[error("{0}")]
    Validation(String),

    /// Credential failure (401), or a server-side auth fault (500).
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Item already owned (409).
    #[error("{0}")]
    Conflict(String),

    /// Server misconfiguration (500).
    #[error("{0}")]
    Config(String),

    /// Persistence failure (500).
    #[error("{0}")]
    Ledger(String),

    /// The platform refused or could not take a notification (502).
    #[error(transparent)]
    Dispatch(DispatchError),
}

impl ApiError {
    /// Response status.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(e) if e.is_server_fault() => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Config(_) | Self::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Dispatch(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Ledger(e.to_string())
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Validation { .. } | LedgerError::UnknownPlayer(_) => {
                Self::Validation(e.to_string())
            }
            LedgerError::Conflict | LedgerError::Store(_) => Self::Ledger(e.to_string()),
        }
    }
}

impl From<PurchaseError> for ApiError {
    fn from(e: PurchaseError) -> Self {
        match e {
            PurchaseError::AlreadyOwned(_) => Self::Conflict(e.to_string()),
            PurchaseError::InvalidItem(_)
            | PurchaseError::InsufficientFunds { .. }
            | PurchaseError::UnknownPlayer(_) => Self::Validation(e.to_string()),
            PurchaseError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<RewardError> for ApiError {
    fn from(e: RewardError) -> Self {
        match e {
            RewardError::UnknownSku(_) => Self::Validation(e.to_string()),
            RewardError::Store(inner) => inner.into(),
        }
    }
}

impl From<LaunchError> for ApiError {
    fn from(e: LaunchError) -> Self {
        match e {
            LaunchError::Store(inner) => inner.into(),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NoIdentity | DispatchError::NoOwner | DispatchError::Token(_) => {
                Self::Config(e.to_string())
            }
            other => Self::Dispatch(other),
        }
    }
}

// =============================================================================
// AUTHORIZATION HELPERS
// =============================================================================

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Bearer token from `Authorization`, tolerating a missing scheme.
fn bearer(headers: &HeaderMap) -> Option<&str> {
    authorization(headers).map(|v| {
        let v = v.trim();
        v.strip_prefix("Bearer ").unwrap_or(v).trim()
    })
}

fn extension_claims(
    state: &AppState,
    headers: &HeaderMap,
    channel_id: &str,
) -> Result<ExtensionClaims, ApiError> {
    let claims = verify_extension_token(bearer(headers), &state.auth)?;
    require_channel(&claims, channel_id)?;
    Ok(claims)
}

async fn require_trust(
    state: &AppState,
    headers: &HeaderMap,
    channel_id: &str,
) -> Result<(), ApiError> {
    Ok(state.trust.require(channel_id, authorization(headers)).await?)
}

// =============================================================================
// EXTENSION-TOKEN ENDPOINTS
// =============================================================================

/// `POST /queueLaunch`
pub async fn queue_launch(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let channel_id = query.channel()?;
    let player_id = query.player()?;
    extension_claims(&state, &headers, &channel_id)?;

    let launches = parse_body(&body)?;
    state.launches.enqueue(&channel_id, &player_id, launches).await?;
    Ok(StatusCode::OK)
}

/// `POST /wildUserAppears`
pub async fn wild_user_appears(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    let player_id = query.player()?;
    let opaque_user_id = query.opaque_user()?;
    extension_claims(&state, &headers, &channel_id)?;

    let view = state
        .ledger
        .get_or_init(&channel_id, &player_id, &opaque_user_id)
        .await?;
    Ok(Json(view).into_response())
}

/// `POST /purchasePointsUpdate`
///
/// Responds with the new point total. The buyer's whisper is sent in the
/// background.
pub async fn purchase_points_update(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    let player_id = query.player()?;
    let item_id = query.store_item()?;
    extension_claims(&state, &headers, &channel_id)?;

    let receipt = state.purchases.purchase(&channel_id, &player_id, &item_id).await?;
    let player = receipt.player;

    if !player.opaque_user_id.is_empty() {
        let notification = Notification::PlayerState {
            points: player.points,
            puck_count: player.puck_count,
            items_purchased: player.owned_items(),
        }
        .to_value();
        let dispatcher = state.dispatcher.clone();
        let opaque_user_id = player.opaque_user_id.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.whisper(&channel_id, &opaque_user_id, &notification).await {
                warn!(error = %e, "purchase whisper failed");
            }
        });
    }

    Ok(Json(player.points).into_response())
}

/// `POST /logTransaction`
///
/// Responds with the recorded upgrade. The chat acknowledgment is sent in the
/// background.
pub async fn log_transaction(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    let player_id = query.player()?;
    extension_claims(&state, &headers, &channel_id)?;

    let purchase = parse_body::<LogTransactionRequest>(&body)?.into_purchase()?;
    let upgrade = state.rewards.apply(&channel_id, &player_id, &purchase).await?;

    let dispatcher = state.dispatcher.clone();
    let text = upgrade.message.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.send_chat(&channel_id, &text).await {
            warn!(error = %e, "chat acknowledgment failed");
        }
    });

    Ok(Json(upgrade).into_response())
}

// =============================================================================
// PLATFORM-LOGIN ENDPOINT
// =============================================================================

/// `GET /verifyToken`
pub async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = authorization(&headers).ok_or(AuthError::MissingToken)?;
    let issued = state.trust.issue(token).await?;
    Ok(Json(issued).into_response())
}

// =============================================================================
// TRUST-HASH ENDPOINTS
// =============================================================================

/// `POST /deleteLaunches`
pub async fn delete_launches(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let channel_id = query.channel()?;
    require_trust(&state, &headers, &channel_id).await?;

    let selection = parse_body::<DeleteLaunchesRequest>(&body)?.into_selection()?;
    state.launches.delete(&channel_id, &selection).await?;
    Ok(StatusCode::OK)
}

/// `POST /updateUsers`
///
/// Applies the balances, then broadcasts them under every identity. A failed
/// broadcast fails the request; the balances stay written.
pub async fn update_users(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let channel_id = query.channel()?;
    require_trust(&state, &headers, &channel_id).await?;

    let users = parse_user_updates(&body)?;
    state.ledger.apply_deltas(&channel_id, &users).await?;

    let notification = Notification::UsersUpdated { users }.to_value();
    state.dispatcher.broadcast_all(&channel_id, &notification).await?;
    Ok(StatusCode::OK)
}

/// `POST /levelStarted`
pub async fn level_started(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    require_trust(&state, &headers, &channel_id).await?;

    let request = parse_body::<LevelStartedRequest>(&body)?.validate()?;
    let level_start_count = state
        .usage
        .level_started(&channel_id, request.level, request.player_id)
        .await?;
    Ok(Json(LevelStartedResponse { level_start_count }).into_response())
}

/// `GET /getUsageData`
pub async fn get_usage_data(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    require_trust(&state, &headers, &channel_id).await?;

    Ok(Json(state.usage.report(&channel_id).await?).into_response())
}

/// `POST /unlockTwitchConTrail`
pub async fn unlock_twitchcon_trail(
    State(state): State<AppState>,
    Query(query): Query<RequestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let channel_id = query.channel()?;
    require_trust(&state, &headers, &channel_id).await?;

    let UnlockRequest { unlocked } = parse_body_or_default(&body)?;
    state
        .catalog
        .set_unlocked(TWITCHCON_TRAIL_ITEM, &channel_id, unlocked)
        .await?;
    Ok(Json(UnlockResponse { unlocked }).into_response())
}

/// `GET /healthz`
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { ok: true })
}
