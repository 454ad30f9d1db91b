//! Webhook lifecycle client for the provider's account activity API

use crate::oauth::basic_credentials;
use crate::{
    ActivityConfig, ActivityError, ActivityEvent, ActivityKind, ApiError, ApiRequest,
    ApiResponse, ApiTransport, AuthContext, ChallengeResponder, ChallengeResponse, ConfigCell,
    ConfigPatch, ConsumerCredentials, Operation, RateLimit, RateLimitLedger, RequestSigner,
    Result, SubscriberRegistry, SubscriberStream, Subscription, SubscriptionList,
    SubscriptionsCount, TokenPair, Webhook, WebhookListing,
};
use crate::challenge::CRC_TOKEN_PARAM;
use http::header::AUTHORIZATION;
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// A subscribed user and the tokens they granted the app
#[derive(Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
    pub access_token: String,
    pub access_token_secret: String,
}

impl UserContext {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        access_token_secret: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            access_token_secret: access_token_secret.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(ActivityError::InvalidArgument(
                "You must provide userId".to_string(),
            ));
        }
        if self.access_token.is_empty() {
            return Err(ActivityError::InvalidArgument(
                "You must provide user accessToken".to_string(),
            ));
        }
        if self.access_token_secret.is_empty() {
            return Err(ActivityError::InvalidArgument(
                "You must provide user accessTokenSecret".to_string(),
            ));
        }
        Ok(())
    }

    fn auth(&self) -> AuthContext {
        AuthContext::User(TokenPair::new(
            self.access_token.as_str(),
            self.access_token_secret.as_str(),
        ))
    }
}

impl fmt::Debug for UserContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserContext")
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token)
            .field("access_token_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct BearerToken {
    token_type: String,
    access_token: String,
}

/// Client for the provider's webhook and subscription endpoints.
///
/// Every call reads the configuration once, when it starts; a concurrent
/// reconfigure only affects calls started afterwards. No call is retried.
#[derive(Clone)]
pub struct AccountActivityClient {
    config: Arc<ConfigCell>,
    registry: SubscriberRegistry,
    transport: Arc<dyn ApiTransport>,
    signer: Arc<dyn RequestSigner>,
    rate_limits: RateLimitLedger,
    bearer_exchange: Arc<tokio::sync::Mutex<()>>,
}

impl AccountActivityClient {
    /// Create a client sharing `config` and `registry` with the receiver
    pub fn new(
        config: Arc<ConfigCell>,
        registry: SubscriberRegistry,
        transport: Arc<dyn ApiTransport>,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        Self {
            config,
            registry,
            transport,
            signer,
            rate_limits: RateLimitLedger::new(),
            bearer_exchange: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// The registry subscriptions are tracked in
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Latest rate-limit snapshot for `operation`
    pub fn rate_limit(&self, operation: Operation) -> Option<RateLimit> {
        self.rate_limits.get(operation)
    }

    /// All rate-limit snapshots
    pub fn rate_limits(&self) -> &RateLimitLedger {
        &self.rate_limits
    }

    /// Register the callback URL (or the configured one) for the environment
    pub async fn register_webhook(
        &self,
        callback_url: Option<&str>,
        app: Option<&TokenPair>,
    ) -> Result<Webhook> {
        let config = self.config.current();
        let auth = app_context(&config, app)?;
        let callback_url = callback_url
            .map(str::to_string)
            .or_else(|| config.callback_url())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ActivityError::InvalidArgument(
                    "You must provide a callback url or configure server_url".to_string(),
                )
            })?;

        let mut url = environment_url(&config, &["webhooks.json"])?;
        url.query_pairs_mut().append_pair("url", &callback_url);

        let webhook: Webhook = self
            .call(&config, Operation::RegisterWebhook, ApiRequest::new(Method::POST, url), &auth)
            .await?
            .json()?;

        info!(webhook_id = %webhook.id, url = %webhook.url, "Registered webhook");
        Ok(webhook)
    }

    /// Remove a webhook from the environment
    pub async fn unregister_webhook(&self, webhook_id: &str, app: Option<&TokenPair>) -> Result<()> {
        let config = self.config.current();
        let auth = app_context(&config, app)?;
        let url = webhook_url(&config, webhook_id)?;

        self.call(&config, Operation::UnregisterWebhook, ApiRequest::new(Method::DELETE, url), &auth)
            .await?;

        info!(webhook_id, "Unregistered webhook");
        Ok(())
    }

    /// List the app's webhooks across all environments
    pub async fn get_webhooks(&self, app: Option<&TokenPair>) -> Result<Vec<Webhook>> {
        let config = self.config.current();
        let auth = self.app_only_context(&config, app).await?;
        let url = config.api_url("account_activity/all/webhooks.json")?;

        let listing: WebhookListing = self
            .call(&config, Operation::GetWebhooks, ApiRequest::new(Method::GET, url), &auth)
            .await?
            .json()?;

        Ok(listing.into_webhooks())
    }

    /// The webhook registered for the configured environment, if any
    pub async fn get_webhook(&self, app: Option<&TokenPair>) -> Result<Option<Webhook>> {
        let config = self.config.current();
        let auth = app_context(&config, app)?;
        let url = environment_url(&config, &["webhooks.json"])?;

        let listing: WebhookListing = self
            .call(&config, Operation::GetWebhook, ApiRequest::new(Method::GET, url), &auth)
            .await?
            .json()?;

        Ok(listing.into_webhooks().into_iter().next())
    }

    /// Ask the provider to run a fresh challenge against the webhook
    pub async fn trigger_challenge_response_check(
        &self,
        webhook_id: &str,
        app: Option<&TokenPair>,
    ) -> Result<()> {
        let config = self.config.current();
        let auth = app_context(&config, app)?;
        let url = webhook_url(&config, webhook_id)?;

        self.call(
            &config,
            Operation::TriggerChallengeResponseCheck,
            ApiRequest::new(Method::PUT, url),
            &auth,
        )
        .await?;

        debug!(webhook_id, "Triggered challenge response check");
        Ok(())
    }

    /// Subscribe the user and return their stream
    pub async fn subscribe(&self, user: &UserContext) -> Result<Arc<SubscriberStream>> {
        user.validate()?;
        let config = self.config.current();
        let url = environment_url(&config, &["subscriptions.json"])?;

        self.call(&config, Operation::Subscribe, ApiRequest::new(Method::POST, url), &user.auth())
            .await?;

        info!(account_id = %user.user_id, "Subscribed account");
        Ok(self.registry.get_or_create(&user.user_id))
    }

    /// Unsubscribe the user; their stream receives `unsubscribe` and closes
    pub async fn unsubscribe(&self, user: &UserContext) -> Result<()> {
        user.validate()?;
        let config = self.config.current();
        let url = environment_url(&config, &["subscriptions.json"])?;

        self.call(&config, Operation::Unsubscribe, ApiRequest::new(Method::DELETE, url), &user.auth())
            .await?;

        let retired = self.registry.retire(
            &user.user_id,
            ActivityEvent::terminal(ActivityKind::Unsubscribe),
        );
        info!(account_id = %user.user_id, retired, "Unsubscribed account");
        Ok(())
    }

    /// Whether the user is subscribed.
    ///
    /// Only a `204` means yes. Any other answer from the provider means no;
    /// a request that got no answer is an error.
    pub async fn is_subscribed(&self, user: &UserContext) -> Result<bool> {
        user.validate()?;
        let config = self.config.current();
        let url = config.api_url("account_activity/subscriptions/list.json")?;

        match self
            .call(&config, Operation::IsSubscribed, ApiRequest::new(Method::GET, url), &user.auth())
            .await
        {
            Ok(response) => Ok(response.status() == StatusCode::NO_CONTENT),
            Err(ActivityError::Api(error)) if !error.is_transport_failure() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Subscriptions of the configured environment
    pub async fn get_subscriptions(&self, app: Option<&TokenPair>) -> Result<Vec<Subscription>> {
        let config = self.config.current();
        let auth = self.app_only_context(&config, app).await?;
        let url = environment_url(&config, &["subscriptions", "list.json"])?;

        let list: SubscriptionList = self
            .call(&config, Operation::GetSubscriptions, ApiRequest::new(Method::GET, url), &auth)
            .await?
            .json()?;

        Ok(list.subscriptions)
    }

    /// Provider-reported subscription counts
    pub async fn get_subscriptions_count(
        &self,
        app: Option<&TokenPair>,
    ) -> Result<SubscriptionsCount> {
        let config = self.config.current();
        let auth = self.app_only_context(&config, app).await?;
        let url = config.api_url("account_activity/all/subscriptions/count.json")?;

        self.call(
            &config,
            Operation::GetSubscriptionsCount,
            ApiRequest::new(Method::GET, url),
            &auth,
        )
        .await?
        .json()
    }

    /// Exchange the consumer credentials for an app-only bearer token.
    ///
    /// The token is stored in the shared configuration and reused by later
    /// app-only calls. Concurrent exchanges are serialized.
    pub async fn obtain_bearer_token(&self) -> Result<String> {
        let _exchange = self.bearer_exchange.lock().await;
        self.exchange_bearer_token().await
    }

    async fn exchange_bearer_token(&self) -> Result<String> {
        let config = self.config.current();
        let basic = format!(
            "Basic {}",
            basic_credentials(&ConsumerCredentials::from(&*config))
        );
        let authorization = HeaderValue::from_str(&basic)
            .map_err(|e| ActivityError::Auth(format!("Invalid consumer credentials: {e}")))?;

        let request = ApiRequest::new(Method::POST, config.token_url.clone())
            .header(AUTHORIZATION, authorization)
            .form(&[("grant_type", "client_credentials")]);

        debug!(url = %config.token_url, "Requesting app-only bearer token");

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| ActivityError::Auth(format!("Token request failed: {e}")))?;

        if !response.is_success() {
            let error = ApiError::from_response(&response);
            warn!(status = error.status_code, "Token endpoint rejected the exchange");
            return Err(ActivityError::Auth(error.to_string()));
        }

        let token: BearerToken = response
            .json()
            .map_err(|e| ActivityError::Auth(format!("Unexpected token response: {e}")))?;
        if !token.token_type.eq_ignore_ascii_case("bearer") || token.access_token.is_empty() {
            return Err(ActivityError::Auth(format!(
                "Unexpected token type: {}",
                token.token_type
            )));
        }

        self.config
            .reconfigure(ConfigPatch::new().app_bearer_token(token.access_token.as_str()))?;
        info!("Obtained app-only bearer token");

        Ok(token.access_token)
    }

    /// Measure the round trip of a challenge against our own callback URL.
    ///
    /// A reply whose token does not match is logged but still timed.
    pub async fn get_crc_check_timing(&self) -> Result<Duration> {
        let config = self.config.current();
        let callback_url = config.callback_url().ok_or_else(|| {
            ActivityError::InvalidArgument("server_url is not configured".to_string())
        })?;

        let crc_token = Uuid::new_v4().simple().to_string();
        let mut url = Url::parse(&callback_url).map_err(|e| {
            ActivityError::Config(format!("Invalid callback url {callback_url}: {e}"))
        })?;
        url.query_pairs_mut().append_pair(CRC_TOKEN_PARAM, &crc_token);

        let started = Instant::now();
        let outcome = self.transport.send(ApiRequest::new(Method::GET, url)).await;
        let elapsed = started.elapsed();

        let response = ApiError::check(outcome)?;
        let expected = ChallengeResponder::new(config.consumer_secret.as_str());
        match response.json::<ChallengeResponse>() {
            Ok(reply) if expected.verify(&crc_token, &reply.response_token) => {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "Challenge round trip");
            }
            _ => warn!(url = %callback_url, "Callback answered the challenge with a wrong token"),
        }

        Ok(elapsed)
    }

    async fn app_only_context(
        &self,
        config: &ActivityConfig,
        app: Option<&TokenPair>,
    ) -> Result<AuthContext> {
        if let Some(tokens) = app.filter(|tokens| is_complete(tokens)) {
            return Ok(AuthContext::App(tokens.clone()));
        }
        if let Some(token) = &config.app_bearer_token {
            return Ok(AuthContext::Bearer(token.clone()));
        }

        // Whoever held the lock before us may have stored a token already
        let _exchange = self.bearer_exchange.lock().await;
        if let Some(token) = &self.config.current().app_bearer_token {
            return Ok(AuthContext::Bearer(token.clone()));
        }
        Ok(AuthContext::Bearer(self.exchange_bearer_token().await?))
    }

    async fn call(
        &self,
        config: &ActivityConfig,
        operation: Operation,
        mut request: ApiRequest,
        auth: &AuthContext,
    ) -> Result<ApiResponse> {
        let consumer = ConsumerCredentials::from(config);
        if let Some(authorization) =
            self.signer
                .authorization(&request.method, &request.url, &consumer, auth)?
        {
            request.headers.insert(AUTHORIZATION, authorization);
        }

        debug!(
            operation = %operation,
            method = %request.method,
            url = %request.url,
            "Calling provider"
        );

        let outcome = self.transport.send(request).await;
        if let Ok(response) = &outcome {
            self.rate_limits.record(operation, response.rate_limit());
        }

        let response = ApiError::check(outcome)?;
        debug!(operation = %operation, status = response.status().as_u16(), "Provider call completed");
        Ok(response)
    }
}

impl fmt::Debug for AccountActivityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountActivityClient")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

fn is_complete(tokens: &TokenPair) -> bool {
    !tokens.token.is_empty() && !tokens.secret.is_empty()
}

/// App context from the call-scoped tokens, else the configured pair.
///
/// A call-scoped pair with an empty half is ignored.
fn app_context(config: &ActivityConfig, app: Option<&TokenPair>) -> Result<AuthContext> {
    if let Some(tokens) = app.filter(|tokens| is_complete(tokens)) {
        return Ok(AuthContext::App(tokens.clone()));
    }
    let configured = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());
    match (
        configured(&config.access_token),
        configured(&config.access_token_secret),
    ) {
        (Some(token), Some(secret)) => Ok(AuthContext::App(TokenPair::new(token, secret))),
        (None, _) => Err(ActivityError::InvalidArgument(
            "You must provide your app accessToken".to_string(),
        )),
        (_, None) => Err(ActivityError::InvalidArgument(
            "You must provide your app accessTokenSecret".to_string(),
        )),
    }
}

/// `account_activity/all/<environment>/<segments...>`, each segment escaped
fn environment_url(config: &ActivityConfig, segments: &[&str]) -> Result<Url> {
    let mut url = config.api_url("account_activity/all/")?;
    url.path_segments_mut()
        .map_err(|_| {
            ActivityError::Config(format!(
                "API base url {} cannot take a path",
                config.api_base_url
            ))
        })?
        .pop_if_empty()
        .push(&config.environment)
        .extend(segments);
    Ok(url)
}

fn webhook_url(config: &ActivityConfig, webhook_id: &str) -> Result<Url> {
    if webhook_id.is_empty() {
        return Err(ActivityError::InvalidArgument(
            "You must provide webhookId".to_string(),
        ));
    }
    environment_url(config, &["webhooks", &format!("{webhook_id}.json")])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NO_STATUS, OAuth1Signer, TransportError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::HeaderMap;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::error::TryRecvError;

    type Outcome = std::result::Result<ApiResponse, TransportError>;

    /// Transport answering from a closure
    struct StubTransport<F>(F);

    #[async_trait]
    impl<F> ApiTransport for StubTransport<F>
    where
        F: Fn(&ApiRequest) -> Outcome + Send + Sync,
    {
        async fn send(&self, request: ApiRequest) -> Outcome {
            tokio::task::yield_now().await;
            (self.0)(&request)
        }
    }

    fn respond(status: u16, body: Value) -> Outcome {
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(body.to_string())
        };
        Ok(ApiResponse::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body,
        ))
    }

    fn config() -> ActivityConfig {
        ActivityConfig::builder("consumer-key", "consumer-secret")
            .access_token("app-token", "app-secret")
            .server_url("https://hooks.example.com")
            .route("/webhook")
            .build()
            .unwrap()
    }

    fn client_with<F>(config: ActivityConfig, handler: F) -> AccountActivityClient
    where
        F: Fn(&ApiRequest) -> Outcome + Send + Sync + 'static,
    {
        AccountActivityClient::new(
            Arc::new(ConfigCell::new(config)),
            SubscriberRegistry::new(),
            Arc::new(StubTransport(handler)),
            Arc::new(OAuth1Signer::new()),
        )
    }

    fn unreachable_transport(_: &ApiRequest) -> Outcome {
        panic!("no request expected")
    }

    fn user() -> UserContext {
        UserContext::new("42", "user-token", "user-secret")
    }

    fn authorization(request: &ApiRequest) -> String {
        request
            .headers
            .get(AUTHORIZATION)
            .map(|v| v.to_str().unwrap().to_string())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_register_then_get_webhook() {
        let registered: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let state = registered.clone();

        let client = client_with(config(), move |request| {
            assert!(authorization(request).starts_with("OAuth "));
            match (request.method.clone(), request.url.path()) {
                (Method::POST, "/1.1/account_activity/all/env-beta/webhooks.json") => {
                    let url = request
                        .url
                        .query_pairs()
                        .find(|(k, _)| k == "url")
                        .map(|(_, v)| v.into_owned())
                        .unwrap();
                    *state.lock() = Some(url.clone());
                    respond(200, json!({"id": "1", "url": url, "valid": true}))
                }
                (Method::GET, "/1.1/account_activity/all/env-beta/webhooks.json") => {
                    let webhooks: Vec<Value> = state
                        .lock()
                        .iter()
                        .map(|url| json!({"id": "1", "url": url, "valid": true}))
                        .collect();
                    respond(200, Value::Array(webhooks))
                }
                other => panic!("unexpected request {other:?}"),
            }
        });

        let webhook = client.register_webhook(Some("https://x/y"), None).await.unwrap();
        assert_eq!(webhook.url, "https://x/y");

        let fetched = client.get_webhook(None).await.unwrap().unwrap();
        assert_eq!(fetched.url, "https://x/y");
        assert_eq!(registered.lock().as_deref(), Some("https://x/y"));
    }

    #[tokio::test]
    async fn test_register_uses_configured_callback() {
        let client = client_with(config(), |request| {
            let url = request
                .url
                .query_pairs()
                .find(|(k, _)| k == "url")
                .map(|(_, v)| v.into_owned())
                .unwrap();
            respond(200, json!({"id": "9", "url": url}))
        });

        let webhook = client.register_webhook(None, None).await.unwrap();
        assert_eq!(webhook.url, "https://hooks.example.com/webhook");
    }

    #[tokio::test]
    async fn test_register_requires_callback_url() {
        let config = ActivityConfig::builder("key", "secret")
            .access_token("t", "s")
            .build()
            .unwrap();
        let client = client_with(config, unreachable_transport);

        assert!(matches!(
            client.register_webhook(None, None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_app_context_requires_tokens() {
        let config = ActivityConfig::builder("key", "secret").build().unwrap();
        let client = client_with(config, unreachable_transport);

        assert!(matches!(
            client.get_webhook(None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.trigger_challenge_response_check("1", None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            client
                .unregister_webhook("1", Some(&TokenPair::new("", "")))
                .await,
            Err(ActivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            client
                .register_webhook(Some("https://x/y"), Some(&TokenPair::new("t", "")))
                .await,
            Err(ActivityError::InvalidArgument(_))
        ));

        let blank = ActivityConfig::builder("key", "secret")
            .access_token("", "")
            .build()
            .unwrap();
        let client = client_with(blank, unreachable_transport);
        assert!(matches!(
            client.get_webhook(None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_call_scoped_tokens_fall_back_to_configured() {
        let client = client_with(config(), |request| {
            assert!(authorization(request).contains("oauth_token=\"app-token\""));
            respond(204, Value::Null)
        });

        client
            .unregister_webhook("7", Some(&TokenPair::new("", "")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_id_is_one_escaped_segment() {
        let client = client_with(config(), |request| {
            assert_eq!(
                request.url.path(),
                "/1.1/account_activity/all/env-beta/webhooks/..%2Fx%3Fy.json"
            );
            assert_eq!(request.url.query(), None);
            respond(204, Value::Null)
        });

        client.unregister_webhook("../x?y", None).await.unwrap();
        client
            .trigger_challenge_response_check("../x?y", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_call_scoped_app_tokens() {
        let config = ActivityConfig::builder("key", "secret").build().unwrap();
        let client = client_with(config, |request| {
            assert!(authorization(request).contains("oauth_token=\"scoped\""));
            respond(204, Value::Null)
        });

        client
            .unregister_webhook("7", Some(&TokenPair::new("scoped", "scoped-secret")))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_webhook_id_required() {
        let client = client_with(config(), unreachable_transport);

        assert!(matches!(
            client.unregister_webhook("", None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.trigger_challenge_response_check("", None).await,
            Err(ActivityError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_user_context_validation() {
        let client = client_with(config(), unreachable_transport);

        for user in [
            UserContext::new("", "t", "s"),
            UserContext::new("1", "", "s"),
            UserContext::new("1", "t", ""),
        ] {
            assert!(matches!(
                client.subscribe(&user).await,
                Err(ActivityError::InvalidArgument(_))
            ));
            assert!(matches!(
                client.is_subscribed(&user).await,
                Err(ActivityError::InvalidArgument(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_subscribe_returns_registry_stream() {
        let client = client_with(config(), |request| {
            assert_eq!(request.method, Method::POST);
            assert!(authorization(request).contains("oauth_token=\"user-token\""));
            respond(204, Value::Null)
        });

        let first = client.subscribe(&user()).await.unwrap();
        let second = client.subscribe(&user()).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &client.registry().get_or_create("42")));
    }

    #[tokio::test]
    async fn test_failed_subscribe_creates_no_stream() {
        let client = client_with(config(), |_| {
            respond(403, json!({"errors": [{"code": 32, "message": "bad auth"}]}))
        });

        let err = client.subscribe(&user()).await.unwrap_err();
        let api = err.api_error().unwrap();
        assert_eq!(api.code, 32);
        assert_eq!(api.status_code, 403);
        assert_eq!(api.message, "bad auth");
        assert!(!client.registry().contains("42"));
    }

    #[tokio::test]
    async fn test_unsubscribe_retires_stream() {
        let client = client_with(config(), |request| {
            assert_eq!(request.method, Method::DELETE);
            respond(204, Value::Null)
        });
        let stream = client.registry().get_or_create("42");
        let mut listener = stream.listen();

        client.unsubscribe(&user()).await.unwrap();

        assert_eq!(listener.try_recv().unwrap().kind, ActivityKind::Unsubscribe);
        assert_eq!(listener.try_recv(), Err(TryRecvError::Disconnected));
        assert!(!client.registry().contains("42"));

        // Nothing left to tear down
        client.unsubscribe(&user()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_unsubscribe_keeps_stream() {
        let client = client_with(config(), |_| respond(500, Value::Null));
        client.registry().get_or_create("42");

        assert!(client.unsubscribe(&user()).await.is_err());
        assert!(client.registry().contains("42"));
    }

    #[tokio::test]
    async fn test_is_subscribed() {
        let yes = client_with(config(), |request| {
            assert_eq!(request.url.path(), "/1.1/account_activity/subscriptions/list.json");
            respond(204, Value::Null)
        });
        assert!(yes.is_subscribed(&user()).await.unwrap());

        let ok_but_not_204 = client_with(config(), |_| respond(200, json!({})));
        assert!(!ok_but_not_204.is_subscribed(&user()).await.unwrap());

        let rejected = client_with(config(), |_| {
            respond(404, json!({"errors": [{"code": 34, "message": "Sorry"}]}))
        });
        assert!(!rejected.is_subscribed(&user()).await.unwrap());

        let unreachable =
            client_with(config(), |_| Err(TransportError::new("connection refused")));
        let err = unreachable.is_subscribed(&user()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(NO_STATUS));
    }

    #[tokio::test]
    async fn test_bearer_exchange_is_cached() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();

        let client = client_with(config(), move |request| {
            if request.url.path() == "/oauth2/token" {
                counter.fetch_add(1, Ordering::SeqCst);
                assert!(authorization(request).starts_with("Basic "));
                assert_eq!(
                    request.body.as_deref(),
                    Some(b"grant_type=client_credentials".as_slice())
                );
                return respond(200, json!({"token_type": "bearer", "access_token": "AAAA"}));
            }
            assert_eq!(authorization(request), "Bearer AAAA");
            respond(200, json!({"subscriptions": [{"user_id": "1"}, {"user_id": "2"}]}))
        });

        let first = client.get_subscriptions(None).await.unwrap();
        let second = client.get_subscriptions(None).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(
            client.config.current().app_bearer_token.as_deref(),
            Some("AAAA")
        );
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_exchange() {
        let exchanges = Arc::new(AtomicUsize::new(0));
        let counter = exchanges.clone();

        let client = client_with(config(), move |request| {
            if request.url.path() == "/oauth2/token" {
                counter.fetch_add(1, Ordering::SeqCst);
                return respond(200, json!({"token_type": "bearer", "access_token": "AAAA"}));
            }
            assert_eq!(authorization(request), "Bearer AAAA");
            respond(200, json!({"subscriptions": []}))
        });

        let (first, second) = tokio::join!(
            client.get_subscriptions(None),
            client.get_subscriptions(None)
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bearer_exchange_failure_is_auth_error() {
        let client = client_with(config(), |_| {
            respond(403, json!({"errors": [{"code": 99, "message": "Unable to verify"}]}))
        });

        assert!(matches!(
            client.get_subscriptions_count(None).await,
            Err(ActivityError::Auth(_))
        ));
        assert!(client.config.current().app_bearer_token.is_none());
    }

    #[tokio::test]
    async fn test_explicit_app_tokens_skip_exchange() {
        let client = client_with(config(), |request| {
            assert_ne!(request.url.path(), "/oauth2/token");
            assert!(authorization(request).starts_with("OAuth "));
            respond(
                200,
                json!({"environments": [{"environment_name": "env-beta", "webhooks": []}]}),
            )
        });

        let webhooks = client
            .get_webhooks(Some(&TokenPair::new("t", "s")))
            .await
            .unwrap();
        assert!(webhooks.is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_count() {
        let config = ActivityConfig::builder("key", "secret")
            .app_bearer_token("configured")
            .build()
            .unwrap();
        let client = client_with(config, |request| {
            assert_eq!(
                request.url.path(),
                "/1.1/account_activity/all/subscriptions/count.json"
            );
            assert_eq!(authorization(request), "Bearer configured");
            respond(
                200,
                json!({"account_name": "acct", "subscriptions_count_all": "3", "subscriptions_count_direct_messages": "1"}),
            )
        });

        let count = client.get_subscriptions_count(None).await.unwrap();
        assert_eq!(count.subscriptions_count_all, 3);
    }

    #[tokio::test]
    async fn test_rate_limit_ledger() {
        let sent = Arc::new(AtomicUsize::new(0));
        let calls = sent.clone();

        let client = client_with(config(), move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(TransportError::new("timeout"));
            }
            let mut headers = HeaderMap::new();
            headers.insert("x-rate-limit-limit", HeaderValue::from_static("15"));
            headers.insert("x-rate-limit-remaining", HeaderValue::from_static("14"));
            headers.insert("x-rate-limit-reset", HeaderValue::from_static("1700000000"));
            Ok(ApiResponse::new(
                StatusCode::OK,
                headers,
                Bytes::from_static(b"[]"),
            ))
        });

        client.get_webhook(None).await.unwrap();
        let recorded = client.rate_limit(Operation::GetWebhook).unwrap();
        assert_eq!(recorded.remaining, 14);

        // A request that got no answer leaves the snapshot alone
        assert!(client.get_webhook(None).await.is_err());
        assert_eq!(client.rate_limit(Operation::GetWebhook), Some(recorded));
        assert!(client.rate_limit(Operation::Subscribe).is_none());
    }

    #[tokio::test]
    async fn test_crc_check_timing() {
        let client = client_with(config(), |request| {
            assert_eq!(request.url.host_str(), Some("hooks.example.com"));
            assert_eq!(request.url.path(), "/webhook");
            let token = request
                .url
                .query_pairs()
                .find(|(k, _)| k == CRC_TOKEN_PARAM)
                .map(|(_, v)| v.into_owned())
                .unwrap();
            let reply = ChallengeResponder::new("consumer-secret").respond(&token);
            respond(200, serde_json::to_value(reply).unwrap())
        });

        assert!(client.get_crc_check_timing().await.is_ok());
    }

    #[tokio::test]
    async fn test_crc_check_timing_propagates_failure() {
        let client = client_with(config(), |_| Err(TransportError::new("connection refused")));
        let err = client.get_crc_check_timing().await.unwrap_err();
        assert_eq!(err.status_code(), Some(NO_STATUS));

        let unconfigured = client_with(
            ActivityConfig::builder("key", "secret").build().unwrap(),
            unreachable_transport,
        );
        assert!(matches!(
            unconfigured.get_crc_check_timing().await,
            Err(ActivityError::InvalidArgument(_))
        ));
    }
}
