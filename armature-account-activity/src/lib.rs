//! Account Activity Webhooks for Armature
//!
//! This crate ingests the provider's account activity push API: it answers
//! the challenge-response check, routes inbound event payloads to per-account
//! subscriber streams and manages webhook registrations and subscriptions.
//!
//! # Features
//!
//! - **Challenge Response**: `sha256=` HMAC-SHA256 answers to `crc_token` checks
//! - **Event Routing**: Per-account streams plus global and unknown-event streams
//! - **Subscription Lifecycle**: Subscribe, unsubscribe and revoke handling
//! - **Provider Client**: Webhook registration, listing and re-verification
//! - **Error Normalization**: One [`ApiError`] shape for every failed call
//! - **Rate Limits**: Latest provider counters per operation
//!
//! # Example: Receiving Events
//!
//! ```rust,no_run
//! use armature_account_activity::{AccountActivity, ActivityConfig, Inbound};
//! use bytes::Bytes;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ActivityConfig::builder("consumer-key", "consumer-secret")
//!     .server_url("https://hooks.example.com")
//!     .route("/webhook")
//!     .build()?;
//! let webhook = AccountActivity::new(config)?;
//!
//! let stream = webhook.get_user_activity("42");
//! let mut events = stream.listen();
//!
//! let request = http::Request::post("/webhook")
//!     .body(Bytes::from_static(br#"{"for_user_id":"42","favorite_events":[{}]}"#))?;
//!
//! match webhook.receiver().handle(&request) {
//!     Inbound::Challenge(response) => { /* send response */ }
//!     Inbound::Accepted(acknowledged) => {
//!         // send acknowledged.response first, then:
//!         acknowledged.dispatch.run();
//!     }
//!     Inbound::PassThrough => { /* next handler */ }
//! }
//!
//! let event = events.try_recv()?;
//! println!("{} for account 42", event.kind);
//! # Ok(())
//! # }
//! ```
//!
//! # Example: Managing Subscriptions
//!
//! ```rust,no_run
//! use armature_account_activity::{AccountActivity, ActivityConfig, UserContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ActivityConfig::builder("consumer-key", "consumer-secret")
//!         .access_token("app-token", "app-token-secret")
//!         .server_url("https://hooks.example.com")
//!         .build()?;
//!     let webhook = AccountActivity::new(config)?;
//!
//!     webhook.client().register_webhook(None, None).await?;
//!
//!     let user = UserContext::new("42", "user-token", "user-token-secret");
//!     let stream = webhook.client().subscribe(&user).await?;
//!     let mut events = stream.listen();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {}", event.kind, event.payload);
//!     }
//!     Ok(())
//! }
//! ```

mod challenge;
mod client;
mod config;
mod endpoint;
mod error;
mod event;
mod fanout;
mod oauth;
mod rate_limit;
mod receiver;
mod registry;
mod router;
mod transport;
mod webhook;

pub use challenge::{CRC_TOKEN_PARAM, ChallengeResponder, ChallengeResponse};
pub use client::{AccountActivityClient, UserContext};
pub use config::{
    ActivityConfig, ActivityConfigBuilder, ConfigCell, ConfigPatch, DEFAULT_API_BASE_URL,
    DEFAULT_ENVIRONMENT, DEFAULT_TOKEN_URL,
};
pub use endpoint::{
    EnvironmentWebhooks, Subscription, SubscriptionList, SubscriptionsCount, Webhook,
    WebhookListing,
};
pub use error::{ActivityError, ApiError, NO_CODE, NO_STATUS};
pub use event::{ActivityEvent, ActivityKind, EventField, InboundPayload, ObservedEvent};
pub use fanout::Listener;
pub use oauth::{
    AuthContext, ConsumerCredentials, OAuth1Signer, RequestSigner, TokenPair, basic_credentials,
    rfc1738,
};
pub use rate_limit::{Operation, RateLimit, RateLimitLedger};
pub use receiver::{Acknowledged, Dispatch, Inbound, WebhookReceiver};
pub use registry::{SubscriberRegistry, SubscriberStream};
pub use router::{DispatchSummary, EventRouter};
pub use transport::{ApiRequest, ApiResponse, ApiTransport, ReqwestTransport, TransportError};
pub use webhook::AccountActivity;

/// Result type for account activity operations
pub type Result<T> = std::result::Result<T, ActivityError>;
