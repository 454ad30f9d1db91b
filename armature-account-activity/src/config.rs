//! Configuration for the account activity webhook
//!
//! [`ActivityConfig`] is an immutable value. Changes go through
//! [`ActivityConfig::reconfigure`], which validates a [`ConfigPatch`] and
//! returns a new value; [`ConfigCell`] holds the live one.

use crate::{ActivityError, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Environment label used when none is configured
pub const DEFAULT_ENVIRONMENT: &str = "env-beta";

/// Provider REST API root
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com/1.1/";

/// Provider OAuth2 token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://api.twitter.com/oauth2/token";

/// Configuration for the account activity webhook
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityConfig {
    /// App consumer key
    pub consumer_key: String,

    /// App consumer secret, also the key of the challenge HMAC
    pub consumer_secret: String,

    /// App access token used for app-context calls
    pub access_token: Option<String>,

    /// App access token secret used for app-context calls
    pub access_token_secret: Option<String>,

    /// App-only bearer token; filled in by the token exchange when absent
    pub app_bearer_token: Option<String>,

    /// Provider environment label
    pub environment: String,

    /// Externally reachable base URL of this server, without trailing slash
    pub server_url: Option<String>,

    /// Route the webhook is mounted on, always starting with `/`
    pub route: String,

    /// Provider REST API root, always ending with `/`
    pub api_base_url: Url,

    /// Provider OAuth2 token endpoint
    pub token_url: Url,

    /// Timeout for outbound requests
    pub timeout: Duration,

    /// User-Agent header for outbound requests
    pub user_agent: String,
}

impl ActivityConfig {
    /// Create a builder for the given consumer credentials
    pub fn builder(
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> ActivityConfigBuilder {
        ActivityConfigBuilder::new(consumer_key, consumer_secret)
    }

    /// Callback URL registered with the provider: server URL + route
    pub fn callback_url(&self) -> Option<String> {
        self.server_url
            .as_ref()
            .map(|server_url| format!("{}{}", server_url, self.route))
    }

    /// Resolve a path against the API root
    pub fn api_url(&self, path: &str) -> Result<Url> {
        self.api_base_url
            .join(path)
            .map_err(|e| ActivityError::Config(format!("Invalid API path {path}: {e}")))
    }

    /// Apply a patch and return the validated result; `self` is untouched
    pub fn reconfigure(&self, patch: ConfigPatch) -> Result<ActivityConfig> {
        let mut next = self.clone();

        if let Some(consumer_key) = patch.consumer_key {
            next.consumer_key = consumer_key;
        }
        if let Some(consumer_secret) = patch.consumer_secret {
            next.consumer_secret = consumer_secret;
        }
        if let Some(server_url) = patch.server_url {
            next.server_url = Some(normalize_server_url(&server_url));
        }
        if let Some(route) = patch.route {
            next.route = normalize_route(&route);
        }
        if let Some(environment) = patch.environment {
            next.environment = environment;
        }
        if let Some(access_token) = patch.access_token {
            next.access_token = Some(access_token);
        }
        if let Some(access_token_secret) = patch.access_token_secret {
            next.access_token_secret = Some(access_token_secret);
        }
        if let Some(app_bearer_token) = patch.app_bearer_token {
            next.app_bearer_token = Some(app_bearer_token);
        }

        next.validate()?;
        Ok(next)
    }

    fn validate(&self) -> Result<()> {
        if self.consumer_key.is_empty() {
            return Err(ActivityError::Config("consumer key is missing".to_string()));
        }
        if self.consumer_secret.is_empty() {
            return Err(ActivityError::Config(
                "consumer secret is missing".to_string(),
            ));
        }
        if self.environment.is_empty() {
            return Err(ActivityError::Config("environment is empty".to_string()));
        }
        if let Some(server_url) = &self.server_url {
            Url::parse(server_url).map_err(|e| {
                ActivityError::Config(format!("Invalid server url {server_url}: {e}"))
            })?;
        }
        Ok(())
    }
}

fn normalize_server_url(server_url: &str) -> String {
    server_url
        .strip_suffix('/')
        .unwrap_or(server_url)
        .to_string()
}

fn normalize_route(route: &str) -> String {
    if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{route}")
    }
}

fn parse_url(value: &str, what: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| ActivityError::Config(format!("Invalid {what} {value}: {e}")))
}

/// Builder for ActivityConfig
#[derive(Debug, Clone)]
pub struct ActivityConfigBuilder {
    consumer_key: String,
    consumer_secret: String,
    access_token: Option<String>,
    access_token_secret: Option<String>,
    app_bearer_token: Option<String>,
    environment: String,
    server_url: Option<String>,
    route: String,
    api_base_url: String,
    token_url: String,
    timeout: Duration,
    user_agent: String,
}

impl ActivityConfigBuilder {
    /// Create a new builder with default settings
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            access_token: None,
            access_token_secret: None,
            app_bearer_token: None,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            server_url: None,
            route: "/".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("Armature-AccountActivity/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set the app access token pair
    pub fn access_token(
        mut self,
        access_token: impl Into<String>,
        access_token_secret: impl Into<String>,
    ) -> Self {
        self.access_token = Some(access_token.into());
        self.access_token_secret = Some(access_token_secret.into());
        self
    }

    /// Set the app-only bearer token
    pub fn app_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.app_bearer_token = Some(token.into());
        self
    }

    /// Set the provider environment label
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Set the externally reachable server URL
    pub fn server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    /// Set the route the webhook is mounted on
    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    /// Point the client at another API root
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Point the bearer exchange at another token endpoint
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the User-Agent header
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ActivityConfig> {
        let api_base_url = if self.api_base_url.ends_with('/') {
            self.api_base_url
        } else {
            format!("{}/", self.api_base_url)
        };

        let config = ActivityConfig {
            consumer_key: self.consumer_key,
            consumer_secret: self.consumer_secret,
            access_token: self.access_token,
            access_token_secret: self.access_token_secret,
            app_bearer_token: self.app_bearer_token,
            environment: self.environment,
            server_url: self.server_url.as_deref().map(normalize_server_url),
            route: normalize_route(&self.route),
            api_base_url: parse_url(&api_base_url, "api base url")?,
            token_url: parse_url(&self.token_url, "token url")?,
            timeout: self.timeout,
            user_agent: self.user_agent,
        };

        config.validate()?;
        Ok(config)
    }
}

/// A partial update applied by [`ActivityConfig::reconfigure`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub server_url: Option<String>,
    pub route: Option<String>,
    pub environment: Option<String>,
    pub access_token: Option<String>,
    pub access_token_secret: Option<String>,
    pub app_bearer_token: Option<String>,
}

impl ConfigPatch {
    /// An empty patch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumer_key(mut self, value: impl Into<String>) -> Self {
        self.consumer_key = Some(value.into());
        self
    }

    pub fn consumer_secret(mut self, value: impl Into<String>) -> Self {
        self.consumer_secret = Some(value.into());
        self
    }

    pub fn server_url(mut self, value: impl Into<String>) -> Self {
        self.server_url = Some(value.into());
        self
    }

    pub fn route(mut self, value: impl Into<String>) -> Self {
        self.route = Some(value.into());
        self
    }

    pub fn environment(mut self, value: impl Into<String>) -> Self {
        self.environment = Some(value.into());
        self
    }

    pub fn access_token(mut self, value: impl Into<String>) -> Self {
        self.access_token = Some(value.into());
        self
    }

    pub fn access_token_secret(mut self, value: impl Into<String>) -> Self {
        self.access_token_secret = Some(value.into());
        self
    }

    pub fn app_bearer_token(mut self, value: impl Into<String>) -> Self {
        self.app_bearer_token = Some(value.into());
        self
    }
}

/// The live configuration shared by the receiver and the client.
///
/// Readers take a snapshot with [`ConfigCell::current`]; a reconfigure never
/// changes a snapshot already handed out.
#[derive(Debug)]
pub struct ConfigCell {
    current: RwLock<Arc<ActivityConfig>>,
}

impl ConfigCell {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> Arc<ActivityConfig> {
        self.current.read().clone()
    }

    /// Validate and install a patched configuration
    pub fn reconfigure(&self, patch: ConfigPatch) -> Result<Arc<ActivityConfig>> {
        let mut current = self.current.write();
        let next = Arc::new(current.reconfigure(patch)?);
        *current = next.clone();
        Ok(next)
    }
}
