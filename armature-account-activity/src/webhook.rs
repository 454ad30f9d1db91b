//! The account activity webhook as one shared object

use crate::{
    AccountActivityClient, ActivityConfig, ApiTransport, ConfigCell, ConfigPatch, EventRouter,
    Listener, ObservedEvent, OAuth1Signer, RequestSigner, ReqwestTransport, Result, SubscriberRegistry,
    SubscriberStream, WebhookReceiver,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Receiver, router and lifecycle client wired to one registry and one
/// configuration.
///
/// Clones share all state.
#[derive(Debug, Clone)]
pub struct AccountActivity {
    config: Arc<ConfigCell>,
    router: EventRouter,
    receiver: WebhookReceiver,
    client: AccountActivityClient,
}

impl AccountActivity {
    /// Create the webhook with the `reqwest` transport and OAuth 1.0a signing
    pub fn new(config: ActivityConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            Arc::new(OAuth1Signer::new()),
        ))
    }

    /// Create the webhook over a custom transport
    pub fn with_transport(config: ActivityConfig, transport: Arc<dyn ApiTransport>) -> Self {
        Self::with_parts(config, transport, Arc::new(OAuth1Signer::new()))
    }

    /// Create the webhook over a custom transport and signer
    pub fn with_parts(
        config: ActivityConfig,
        transport: Arc<dyn ApiTransport>,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        let registry = SubscriberRegistry::new();
        let router = EventRouter::new(registry.clone());

        info!(
            environment = %config.environment,
            callback_url = config.callback_url().as_deref().unwrap_or("<unset>"),
            "Account activity webhook configured"
        );

        let config = Arc::new(ConfigCell::new(config));
        let receiver = WebhookReceiver::new(config.clone(), router.clone());
        let client = AccountActivityClient::new(config.clone(), registry, transport, signer);

        Self {
            config,
            router,
            receiver,
            client,
        }
    }

    /// Inbound side: challenge answers and event intake
    pub fn receiver(&self) -> &WebhookReceiver {
        &self.receiver
    }

    /// Outbound side: webhook and subscription management
    pub fn client(&self) -> &AccountActivityClient {
        &self.client
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        self.router.registry()
    }

    /// The account's stream, created if needed
    pub fn get_user_activity(&self, account_id: &str) -> Arc<SubscriberStream> {
        self.registry().get_or_create(account_id)
    }

    /// Every routed event, whatever the account
    pub fn events(&self) -> Listener<ObservedEvent> {
        self.router.events()
    }

    /// Payloads of unknown shape
    pub fn unknown_events(&self) -> Listener<Value> {
        self.router.unknown_events()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> Arc<ActivityConfig> {
        self.config.current()
    }

    /// Validate and apply a configuration patch
    pub fn reconfigure(&self, patch: ConfigPatch) -> Result<Arc<ActivityConfig>> {
        let config = self.config.reconfigure(patch)?;
        info!(environment = %config.environment, "Account activity webhook reconfigured");
        Ok(config)
    }

    /// Callback URL derived from the current server URL and route
    pub fn callback_url(&self) -> Option<String> {
        self.config.current().callback_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Acknowledged, ActivityError, ActivityKind, ApiRequest, ApiResponse, Inbound,
        TransportError, UserContext,
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Request, StatusCode};

    struct NoContent;

    #[async_trait]
    impl ApiTransport for NoContent {
        async fn send(
            &self,
            _request: ApiRequest,
        ) -> std::result::Result<ApiResponse, TransportError> {
            Ok(ApiResponse::new(
                StatusCode::NO_CONTENT,
                HeaderMap::new(),
                Bytes::new(),
            ))
        }
    }

    fn webhook() -> AccountActivity {
        let config = ActivityConfig::builder("key", "secret")
            .server_url("https://hooks.example.com/")
            .route("webhook")
            .build()
            .unwrap();
        AccountActivity::with_transport(config, Arc::new(NoContent))
    }

    #[test]
    fn test_get_user_activity_is_stable() {
        let webhook = webhook();
        let first = webhook.get_user_activity("42");
        let second = webhook.clone().get_user_activity("42");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let webhook = webhook();
        let stream = webhook
            .client()
            .subscribe(&UserContext::new("42", "t", "s"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&stream, &webhook.get_user_activity("42")));
        let mut listener = stream.listen();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/webhook")
            .body(Bytes::from_static(
                br#"{"for_user_id":"42","direct_message_events":[{"id":"dm"}]}"#,
            ))
            .unwrap();

        let Inbound::Accepted(Acknowledged { dispatch, .. }) = webhook.receiver().handle(&request)
        else {
            panic!("expected an acknowledgment");
        };
        dispatch.run();

        let event = listener.recv().await.unwrap();
        assert_eq!(event.kind, ActivityKind::DirectMessage);
        assert_eq!(event.payload["id"], "dm");
    }

    #[test]
    fn test_reconfigure() {
        let webhook = webhook();
        assert_eq!(
            webhook.callback_url().as_deref(),
            Some("https://hooks.example.com/webhook")
        );

        webhook
            .reconfigure(ConfigPatch::new().server_url("https://other.example.com"))
            .unwrap();
        assert_eq!(
            webhook.callback_url().as_deref(),
            Some("https://other.example.com/webhook")
        );

        assert!(matches!(
            webhook.reconfigure(ConfigPatch::new().consumer_key("")),
            Err(ActivityError::Config(_))
        ));
        assert_eq!(webhook.config().consumer_key, "key");
    }

    #[test]
    fn test_shared_streams() {
        let webhook = webhook();
        let mut unknown = webhook.unknown_events();

        webhook
            .receiver()
            .accept(br#"{"surprise":true}"#)
            .dispatch
            .run();

        assert_eq!(unknown.try_recv().unwrap()["surprise"], true);
        assert!(webhook.registry().is_empty());
    }
}
