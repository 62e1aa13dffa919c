//! HTTP Server
//!
//! Wires configuration into the domain services and exposes them as an
//! axum router. Every route answers CORS preflights before any handler runs.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::game::{Catalog, LaunchQueue, Ledger, PurchaseEngine, RewardEngine, UsageTracker};
use crate::network::auth::AuthConfig;
use crate::network::dispatch::{DispatchConfig, DispatchError, Dispatcher};
use crate::network::handlers::{self, AppState};
use crate::network::platform::{
    outbound_timeout_from_env, PlatformClient, PlatformConfig, PlatformError,
};
use crate::network::trust::{TrustConfig, TrustIssuer};
use crate::store::{MemoryStore, RemoteStore, RemoteStoreConfig, Store, StoreError};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .map_err(|_| ServerError::InvalidConfig(format!("BIND_ADDR {addr:?}")))?;
        }
        Ok(config)
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Listener.
    pub server: ServerConfig,
    /// Extension token verification.
    pub auth: AuthConfig,
    /// Trust hashes.
    pub trust: TrustConfig,
    /// Identity service.
    pub platform: PlatformConfig,
    /// Notifications.
    pub dispatch: DispatchConfig,
    /// Remote store; `None` runs on an in-memory tree.
    pub store: Option<RemoteStoreConfig>,
}

impl AppConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ServerError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            auth: AuthConfig::from_env(),
            trust: TrustConfig::from_env(),
            platform: PlatformConfig::from_env(),
            dispatch: DispatchConfig::from_env(),
            store: RemoteStoreConfig::from_env(outbound_timeout_from_env()),
        })
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// A configuration value is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Store adapter could not be built.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Identity client could not be built.
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Dispatcher could not be built.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Build handler state over an explicit store.
pub fn build_state_with_store(
    config: &AppConfig,
    store: Arc<dyn Store>,
) -> Result<AppState, ServerError> {
    let ledger = Ledger::new(store.clone());
    let catalog = Catalog::new(store.clone());
    let platform = PlatformClient::new(config.platform.clone())?;

    Ok(AppState {
        auth: config.auth.clone(),
        trust: TrustIssuer::new(store.clone(), platform, config.trust.clone()),
        purchases: PurchaseEngine::new(ledger.clone(), catalog.clone()),
        rewards: RewardEngine::new(store.clone()),
        launches: LaunchQueue::new(store.clone()),
        usage: UsageTracker::new(store),
        dispatcher: Dispatcher::new(config.dispatch.clone())?,
        ledger,
        catalog,
    })
}

/// Build handler state, choosing the store from configuration.
pub fn build_state(config: &AppConfig) -> Result<AppState, ServerError> {
    let store: Arc<dyn Store> = match &config.store {
        Some(remote) => {
            info!(base_url = %remote.base_url, "using remote store");
            Arc::new(RemoteStore::new(remote.clone())?)
        }
        None => {
            warn!("STORE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    build_state_with_store(config, store)
}

/// The HTTP surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/queueLaunch", post(handlers::queue_launch))
        .route("/wildUserAppears", post(handlers::wild_user_appears))
        .route("/verifyToken", get(handlers::verify_token))
        .route("/deleteLaunches", post(handlers::delete_launches))
        .route("/updateUsers", post(handlers::update_users))
        .route("/purchasePointsUpdate", post(handlers::purchase_points_update))
        .route("/logTransaction", post(handlers::log_transaction))
        .route("/levelStarted", post(handlers::level_started))
        .route("/getUsageData", get(handlers::get_usage_data))
        .route("/unlockTwitchConTrail", post(handlers::unlock_twitchcon_trail))
        .route("/healthz", get(handlers::healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive().max_age(Duration::from_secs(3600)))
        .with_state(state)
}

/// Run the server until ctrl-c.
pub async fn serve(config: AppConfig) -> Result<(), ServerError> {
    if !config.auth.is_configured() {
        warn!("EXTENSION_SECRET not set, extension endpoints will answer 500");
    }
    let state = build_state(&config)?;
    let listener = TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, version = %config.server.version, "server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::trust_hash;
    use crate::game::BalanceUpdate;
    use crate::network::auth::tests::{create_test_token, viewer_claims, PRIMARY, SECONDARY};
    use crate::network::dispatch::tests::{
        decode_claims, dispatch_config, spawn_fake_platform, Captured, FakePlatform,
    };
    use crate::network::dispatch::BROADCAST_SPACING;
    use crate::network::platform::tests::spawn_identity_service;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SALT: &str = "pepper";

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
        state: AppState,
        platform: FakePlatform,
    }

    async fn harness_with(fail_client: Option<&str>) -> Harness {
        let platform = spawn_fake_platform(fail_client).await;
        let config = AppConfig {
            auth: AuthConfig {
                primary_secret: Some(PRIMARY.into()),
                secondary_secret: Some(SECONDARY.into()),
                ..Default::default()
            },
            trust: TrustConfig { salt: Some(SALT.into()) },
            platform: PlatformConfig {
                id_base: spawn_identity_service().await,
                timeout: Duration::from_secs(2),
            },
            dispatch: dispatch_config(platform.base.clone()),
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let state = build_state_with_store(&config, store.clone()).unwrap();
        Harness {
            app: router(state.clone()),
            store,
            state,
            platform,
        }
    }

    async fn harness() -> Harness {
        harness_with(None).await
    }

    impl Harness {
        async fn call(
            &self,
            method: Method,
            uri: &str,
            auth: Option<&str>,
            body: &str,
        ) -> Response {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(auth) = auth {
                request = request.header(header::AUTHORIZATION, auth);
            }
            let request = request.body(Body::from(body.to_string())).unwrap();
            self.app.clone().oneshot(request).await.unwrap()
        }

        async fn trust(&self, channel_id: &str) -> String {
            let hash = trust_hash(channel_id, "login-token", SALT);
            self.store
                .set(
                    &format!("trust/{channel_id}"),
                    json!({"hash": hash, "lastValidated": 0}),
                )
                .await
                .unwrap();
            hash
        }
    }

    fn viewer_token(channel_id: &str) -> String {
        format!("Bearer {}", create_test_token(&viewer_claims(channel_id), PRIMARY))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const PURCHASE_X: &str = "/purchasePointsUpdate?channelId=C1&playerId=P1&storeItemId=X";
    const LOG_P1: &str = "/logTransaction?channelId=C1&playerId=P1";
    const UNLOCK_C1: &str = "/unlockTwitchConTrail?channelId=C1";
    const GIFT_BODY: &str = r#"{
        "transactionId": "t1",
        "product": {"sku": "give-10-to-everyone", "cost": {"amount": 50, "type": "bits"}},
        "displayName": "Fan"
    }"#;

    /// Item `X` for 30 and player `P1` (opaque `U1`) in `C1` with 50 points.
    async fn seed_buyer(h: &Harness) {
        h.store.set("storeItems/X", json!({"cost": 30})).await.unwrap();
        h.state.ledger.get_or_init("C1", "P1", "U1").await.unwrap();
        h.state
            .ledger
            .apply_delta("C1", "P1", &BalanceUpdate { points: Some(50), puck_count: None })
            .await
            .unwrap();
    }

    fn pushed_message(sent: &Captured) -> Value {
        serde_json::from_str(sent.body["message"].as_str().unwrap()).unwrap()
    }

    /// Wait for the background notification to reach the fake platform.
    async fn wait_for_capture(platform: &FakePlatform, path: &str) -> Captured {
        for _ in 0..100 {
            let found = platform
                .captured
                .lock()
                .await
                .iter()
                .find(|c| c.path == path)
                .cloned();
            if let Some(found) = found {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no request to {path}");
    }

    #[tokio::test]
    async fn test_healthz() {
        let h = harness().await;
        let response = h.call(Method::GET, "/healthz", None, "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_preflight_skips_auth() {
        let h = harness().await;
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/purchasePointsUpdate?channelId=C1")
            .header(header::ORIGIN, "https://extension.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();
        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    #[tokio::test]
    async fn test_wild_user_appears() {
        let h = harness().await;
        let uri = "/wildUserAppears?channelId=C1&playerId=P1&opaqueUserId=U1";

        assert_eq!(h.call(Method::POST, uri, None, "").await.status(), StatusCode::UNAUTHORIZED);
        let other_channel = viewer_token("C2");
        assert_eq!(
            h.call(Method::POST, uri, Some(&other_channel), "").await.status(),
            StatusCode::UNAUTHORIZED
        );

        let response = h.call(Method::POST, uri, Some(&viewer_token("C1")), "").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"puckCount": 100, "points": 0}));

        let missing = h
            .call(
                Method::POST,
                "/wildUserAppears?channelId=C1&playerId=P1",
                Some(&viewer_token("C1")),
                "",
            )
            .await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_secondary_key_token_accepted() {
        let h = harness().await;
        let token = format!("Bearer {}", create_test_token(&viewer_claims("C1"), SECONDARY));
        let response = h
            .call(
                Method::POST,
                "/wildUserAppears?channelId=C1&playerId=P1&opaqueUserId=U1",
                Some(&token),
                "",
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_purchase_scenario() {
        let h = harness().await;
        seed_buyer(&h).await;
        let token = viewer_token("C1");

        let first = h.call(Method::POST, PURCHASE_X, Some(&token), "").await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(json_body(first).await, json!(20));

        let second = h.call(Method::POST, PURCHASE_X, Some(&token), "").await;
        assert_eq!(second.status(), StatusCode::CONFLICT);

        let player = h.state.ledger.get("C1", "P1").await.unwrap().unwrap();
        assert_eq!(player.points, 20);
        assert!(player.owns("X"));
    }

    #[tokio::test]
    async fn test_purchase_rejections_leave_state() {
        let h = harness().await;
        h.store.set("storeItems/X", json!({"cost": 30})).await.unwrap();
        h.state.ledger.get_or_init("C1", "P1", "U1").await.unwrap();
        let token = viewer_token("C1");

        let poor = h
            .call(
                Method::POST,
                "/purchasePointsUpdate?channelId=C1&playerId=P1&storeItemId=X",
                Some(&token),
                "",
            )
            .await;
        assert_eq!(poor.status(), StatusCode::BAD_REQUEST);

        let unknown_item = h
            .call(
                Method::POST,
                "/purchasePointsUpdate?channelId=C1&playerId=P1&storeItemId=Nope",
                Some(&token),
                "",
            )
            .await;
        assert_eq!(unknown_item.status(), StatusCode::BAD_REQUEST);

        let unknown_player = h
            .call(
                Method::POST,
                "/purchasePointsUpdate?channelId=C1&playerId=P9&storeItemId=X",
                Some(&token),
                "",
            )
            .await;
        assert_eq!(unknown_player.status(), StatusCode::BAD_REQUEST);

        let player = h.state.ledger.get("C1", "P1").await.unwrap().unwrap();
        assert_eq!(player.points, 0);
        assert!(player.items_purchased.is_empty());
    }

    #[tokio::test]
    async fn test_update_users_scenario() {
        let h = harness().await;
        let hash = h.trust("C1").await;
        h.state.ledger.get_or_init("C1", "P1", "U1").await.unwrap();

        let response = h
            .call(
                Method::POST,
                "/updateUsers?channelId=C1",
                Some(&hash),
                r#"{"P1": {"points": 10}}"#,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let player = h.state.ledger.get("C1", "P1").await.unwrap().unwrap();
        assert_eq!(player.points, 10);
        assert_eq!(player.puck_count, 100);

        let captured = h.platform.captured.lock().await;
        let broadcasts: Vec<_> = captured
            .iter()
            .filter(|c| c.path == "/extensions/pubsub")
            .collect();
        assert_eq!(broadcasts.len(), 2);
        assert!(broadcasts[1].at.duration_since(broadcasts[0].at) >= BROADCAST_SPACING);
        for (sent, secret) in broadcasts.iter().zip([PRIMARY, SECONDARY]) {
            assert_eq!(decode_claims(&sent.bearer, secret)["channel_id"], "C1");
            assert_eq!(sent.body["broadcaster_id"], "C1");
            assert_eq!(sent.body["target"], json!(["broadcast"]));
            let message = pushed_message(sent);
            assert_eq!(message, json!({"type": "usersUpdated", "users": {"P1": {"points": 10}}}));
        }
    }

    #[tokio::test]
    async fn test_update_users_rejections() {
        let h = harness().await;
        h.trust("C1").await;

        let wrong = h
            .call(
                Method::POST,
                "/updateUsers?channelId=C1",
                Some("deadbeef"),
                r#"{"P1": {"points": 10}}"#,
            )
            .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let hash = h.trust("C1").await;
        let negative = h
            .call(
                Method::POST,
                "/updateUsers?channelId=C1",
                Some(&hash),
                r#"{"P1": {"points": -1}}"#,
            )
            .await;
        assert_eq!(negative.status(), StatusCode::BAD_REQUEST);

        let text = h
            .call(
                Method::POST,
                "/updateUsers?channelId=C1",
                Some(&hash),
                r#"{"P1": {"points": "ten"}}"#,
            )
            .await;
        assert_eq!(text.status(), StatusCode::BAD_REQUEST);

        assert!(h.state.ledger.get("C1", "P1").await.unwrap().is_none());
        assert!(h.platform.captured.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_update_users_broadcast_failure_is_bad_gateway() {
        let h = harness_with(Some("bits-ext")).await;
        let hash = h.trust("C1").await;

        let response = h
            .call(
                Method::POST,
                "/updateUsers?channelId=C1",
                Some(&hash),
                r#"{"P1": {"puckCount": 5}}"#,
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let player = h.state.ledger.get("C1", "P1").await.unwrap().unwrap();
        assert_eq!(player.puck_count, 5);
    }

    #[tokio::test]
    async fn test_queue_launch() {
        let h = harness().await;
        let token = viewer_token("C1");
        let uri = "/queueLaunch?channelId=C1&playerId=P1";

        assert_eq!(
            h.call(Method::POST, uri, Some(&token), r#"{"id": 1}"#).await.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            h.call(Method::POST, uri, Some(&token), r#"[{"pucks": 1}]"#).await.status(),
            StatusCode::BAD_REQUEST
        );

        let ok = h
            .call(
                Method::POST,
                uri,
                Some(&token),
                r#"[{"id": "a", "pucks": 2}, {"id": "b", "pucks": 0}]"#,
            )
            .await;
        assert_eq!(ok.status(), StatusCode::OK);

        let queued = h.store.get("channels/C1/launches").await.unwrap().unwrap();
        let queued: Vec<&Value> = queued.as_object().unwrap().values().collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0]["id"], "a");
        assert_eq!(queued[0]["playerId"], "P1");
    }

    #[tokio::test]
    async fn test_delete_launches() {
        let h = harness().await;
        let hash = h.trust("C1").await;
        h.store.set("channels/C1/launches/k1", json!({"id": 1})).await.unwrap();
        h.store.set("channels/C1/launches/k2", json!({"id": 2})).await.unwrap();

        let neither = h.call(Method::POST, "/deleteLaunches?channelId=C1", Some(&hash), "{}").await;
        assert_eq!(neither.status(), StatusCode::BAD_REQUEST);

        let some = h
            .call(
                Method::POST,
                "/deleteLaunches?channelId=C1",
                Some(&hash),
                r#"{"launchids": ["k1"]}"#,
            )
            .await;
        assert_eq!(some.status(), StatusCode::OK);
        assert_eq!(
            h.store.get("channels/C1/launches").await.unwrap(),
            Some(json!({"k2": {"id": 2}}))
        );

        let all = h
            .call(
                Method::POST,
                "/deleteLaunches?channelId=C1",
                Some(&hash),
                r#"{"deleteAll": true}"#,
            )
            .await;
        assert_eq!(all.status(), StatusCode::OK);
        assert!(h.store.get("channels/C1/launches").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_transaction() {
        let h = harness().await;
        let token = viewer_token("C1");

        let unknown = h
            .call(
                Method::POST,
                LOG_P1,
                Some(&token),
                r#"{"transactionId": "t0", "product": {"sku": "get-9000"}}"#,
            )
            .await;
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert!(h.store.get("channels/C1/upgrades").await.unwrap().is_none());

        let ok = h.call(Method::POST, LOG_P1, Some(&token), GIFT_BODY).await;
        assert_eq!(ok.status(), StatusCode::OK);
        let upgrade = json_body(ok).await;
        assert_eq!(upgrade["puckCount"], 10);
        assert_eq!(upgrade["target"], "all");
        assert_eq!(upgrade["source"], "P1");
        assert_eq!(upgrade["message"], "Fan gave 10 pucks to everyone!");

        let key = upgrade["transactionKey"].as_str().unwrap();
        let record = h
            .store
            .get(&format!("channels/C1/transactions/P1/{key}"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["transactionId"], "t1");
    }

    #[tokio::test]
    async fn test_verify_token_then_usage() {
        let h = harness().await;

        let rejected = h.call(Method::GET, "/verifyToken", Some("OAuth bad-token"), "").await;
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let issued = h.call(Method::GET, "/verifyToken", Some("OAuth good-token"), "").await;
        assert_eq!(issued.status(), StatusCode::OK);
        let issued = json_body(issued).await;
        assert_eq!(issued["user_id"], "4242");
        assert_eq!(issued["login"], "streamer");
        assert!(issued["lastValidated"].as_i64().unwrap() > 0);
        let hash = issued["hash"].as_str().unwrap().to_uppercase();

        let started = h
            .call(
                Method::POST,
                "/levelStarted?channelId=4242",
                Some(&hash),
                r#"{"level": "rink", "playerId": "P1"}"#,
            )
            .await;
        assert_eq!(started.status(), StatusCode::OK);
        assert_eq!(json_body(started).await, json!({"levelStartCount": 1}));

        let usage = h.call(Method::GET, "/getUsageData?channelId=4242", Some(&hash), "").await;
        assert_eq!(usage.status(), StatusCode::OK);
        let usage = json_body(usage).await;
        assert_eq!(usage["channelId"], "4242");
        assert_eq!(usage["levelStartCount"], 1);
        assert_eq!(usage["levelsStarted"][0]["level"], "rink");

        let other = h.call(Method::GET, "/getUsageData?channelId=C1", Some(&hash), "").await;
        assert_eq!(other.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unlock_twitchcon_trail() {
        let h = harness().await;
        let hash = h.trust("C1").await;
        h.store
            .set("storeItems/twitchConTrail", json!({"cost": 10, "exclusiveTo": "locked"}))
            .await
            .unwrap();

        let unlocked = h.call(Method::POST, UNLOCK_C1, Some(&hash), "").await;
        assert_eq!(unlocked.status(), StatusCode::OK);
        assert_eq!(json_body(unlocked).await, json!({"unlocked": true}));
        assert_eq!(
            h.store.get("storeItems/twitchConTrail/unlockedFor/C1").await.unwrap(),
            Some(json!(true))
        );

        let locked = h
            .call(Method::POST, UNLOCK_C1, Some(&hash), r#"{"unlocked": false}"#)
            .await;
        assert_eq!(json_body(locked).await, json!({"unlocked": false}));
        assert_eq!(
            h.store.get("storeItems/twitchConTrail").await.unwrap(),
            Some(json!({"cost": 10, "exclusiveTo": "locked"}))
        );
    }

    #[tokio::test]
    async fn test_relock_keeps_item_gated() {
        let h = harness().await;
        h.store
            .set("storeItems/twitchConTrail", json!({"cost": 10, "exclusiveTo": "locked"}))
            .await
            .unwrap();
        for channel in ["C1", "C2", "C3"] {
            h.state.ledger.get_or_init(channel, "P1", "U1").await.unwrap();
            h.state
                .ledger
                .apply_delta(channel, "P1", &BalanceUpdate { points: Some(50), puck_count: None })
                .await
                .unwrap();
        }
        let c1 = h.trust("C1").await;
        let c2 = h.trust("C2").await;
        let buy = |channel: &str| {
            format!(
                "/purchasePointsUpdate?channelId={channel}&playerId=P1&storeItemId=twitchConTrail"
            )
        };

        h.call(Method::POST, UNLOCK_C1, Some(&c1), "").await;
        h.call(Method::POST, "/unlockTwitchConTrail?channelId=C2", Some(&c2), "").await;
        h.call(Method::POST, UNLOCK_C1, Some(&c1), r#"{"unlocked": false}"#).await;

        for (channel, expected) in [
            ("C1", StatusCode::BAD_REQUEST),
            ("C2", StatusCode::OK),
            ("C3", StatusCode::BAD_REQUEST),
        ] {
            let response = h
                .call(Method::POST, &buy(channel), Some(&viewer_token(channel)), "")
                .await;
            assert_eq!(response.status(), expected, "purchase in {channel}");
        }
        let c3 = h.state.ledger.get("C3", "P1").await.unwrap().unwrap();
        assert_eq!(c3.points, 50);
    }

    #[tokio::test]
    async fn test_purchase_whispers_player_state() {
        let h = harness().await;
        seed_buyer(&h).await;

        let response = h
            .call(Method::POST, PURCHASE_X, Some(&viewer_token("C1")), "")
            .await;
        assert_eq!(json_body(response).await, json!(20));

        let sent = wait_for_capture(&h.platform, "/extensions/pubsub").await;
        assert_eq!(sent.client_id, "main-ext");
        assert_eq!(sent.body["target"], json!(["whisper-U1"]));
        assert_eq!(sent.body["broadcaster_id"], "C1");
        assert_eq!(
            pushed_message(&sent),
            json!({"type": "playerState", "points": 20, "puckCount": 100, "itemsPurchased": ["X"]})
        );
    }

    #[tokio::test]
    async fn test_failed_whisper_keeps_committed_purchase() {
        let h = harness_with(Some("main-ext")).await;
        seed_buyer(&h).await;

        let response = h
            .call(Method::POST, PURCHASE_X, Some(&viewer_token("C1")), "")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!(20));

        // The platform saw (and rejected) the whisper.
        wait_for_capture(&h.platform, "/extensions/pubsub").await;
        let player = h.state.ledger.get("C1", "P1").await.unwrap().unwrap();
        assert_eq!(player.points, 20);
        assert!(player.owns("X"));
    }

    #[tokio::test]
    async fn test_log_transaction_posts_chat() {
        let h = harness().await;
        let response = h
            .call(Method::POST, LOG_P1, Some(&viewer_token("C1")), GIFT_BODY)
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let sent = wait_for_capture(&h.platform, "/extensions/chat").await;
        assert_eq!(sent.query.get("broadcaster_id").map(String::as_str), Some("C1"));
        assert_eq!(sent.body["text"], "Fan gave 10 pucks to everyone!");
        assert_eq!(sent.body["extension_id"], "main-ext");
        assert_eq!(decode_claims(&sent.bearer, PRIMARY)["user_id"], "owner-1");
    }

    #[tokio::test]
    async fn test_failed_chat_keeps_recorded_reward() {
        let h = harness_with(Some("main-ext")).await;
        let response = h
            .call(Method::POST, LOG_P1, Some(&viewer_token("C1")), GIFT_BODY)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let upgrade = json_body(response).await;

        wait_for_capture(&h.platform, "/extensions/chat").await;
        let key = upgrade["transactionKey"].as_str().unwrap();
        assert!(h
            .store
            .get(&format!("channels/C1/transactions/P1/{key}"))
            .await
            .unwrap()
            .is_some());
        assert!(h.store.get("channels/C1/upgrades").await.unwrap().is_some());
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 8080);
    }
}
