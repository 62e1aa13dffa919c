//! Network Layer
//!
//! HTTP surface of the economy service plus its outbound platform clients.
//! Authorization is resolved here; all state changes go through `game/`.

pub mod auth;
pub mod trust;
pub mod platform;
pub mod dispatch;
pub mod protocol;
pub mod handlers;
pub mod server;

pub use auth::{verify_extension_token, AuthConfig, AuthError, ExtensionClaims};
pub use trust::{TrustConfig, TrustIssuer, TrustToken};
pub use platform::{PlatformClient, PlatformConfig, PlatformError};
pub use dispatch::{build_scoped_token, DispatchConfig, DispatchError, Dispatcher, Target};
pub use protocol::Notification;
pub use handlers::{ApiError, AppState};
pub use server::{router, serve, AppConfig, ServerConfig, ServerError};
