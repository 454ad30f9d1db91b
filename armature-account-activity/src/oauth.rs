//! Request signing for user, app and app-only contexts
//!
//! User and app contexts are signed with OAuth 1.0a (HMAC-SHA1); the app-only
//! context sends the bearer token obtained from the client-credentials grant.

use crate::{ActivityConfig, ActivityError, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use http::{HeaderValue, Method};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;
use std::fmt;
use url::Url;
use uuid::Uuid;

type HmacSha1 = Hmac<Sha1>;

/// RFC 3986 unreserved characters stay as they are, everything else is encoded
const OAUTH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// An access token and its secret
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token: String,
    pub secret: String,
}

impl TokenPair {
    pub fn new(token: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("token", &self.token)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The app's consumer credentials
#[derive(Clone, PartialEq, Eq)]
pub struct ConsumerCredentials {
    pub key: String,
    pub secret: String,
}

impl From<&ActivityConfig> for ConsumerCredentials {
    fn from(config: &ActivityConfig) -> Self {
        Self {
            key: config.consumer_key.clone(),
            secret: config.consumer_secret.clone(),
        }
    }
}

impl fmt::Debug for ConsumerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerCredentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Who a request is made on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    /// A subscribed user's tokens
    User(TokenPair),
    /// The app owner's tokens
    App(TokenPair),
    /// App-only bearer token
    Bearer(String),
    /// Unauthenticated
    None,
}

/// Produces the `Authorization` header for a request
pub trait RequestSigner: Send + Sync {
    /// Header value for `auth`, or `None` when the request goes unsigned
    fn authorization(
        &self,
        method: &Method,
        url: &Url,
        consumer: &ConsumerCredentials,
        auth: &AuthContext,
    ) -> Result<Option<HeaderValue>>;
}

/// OAuth 1.0a HMAC-SHA1 signer
#[derive(Debug, Clone, Copy, Default)]
pub struct OAuth1Signer;

impl OAuth1Signer {
    pub fn new() -> Self {
        Self
    }

    /// Build the OAuth header with an explicit timestamp and nonce.
    ///
    /// Query parameters of `url` and `extra_params` (form body parameters)
    /// are part of the signature base string.
    pub fn sign_with(
        &self,
        method: &Method,
        url: &Url,
        consumer: &ConsumerCredentials,
        tokens: &TokenPair,
        timestamp: &str,
        nonce: &str,
        extra_params: &[(String, String)],
    ) -> String {
        let mut oauth_params = vec![
            ("oauth_consumer_key".to_string(), consumer.key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_token".to_string(), tokens.token.clone()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];

        let mut encoded: Vec<(String, String)> = oauth_params
            .iter()
            .cloned()
            .chain(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())))
            .chain(extra_params.iter().cloned())
            .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
            .collect();
        encoded.sort();

        let param_string = encoded
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut base_url = url.clone();
        base_url.set_query(None);
        base_url.set_fragment(None);

        let base_string = format!(
            "{}&{}&{}",
            method.as_str().to_uppercase(),
            percent_encode(base_url.as_str()),
            percent_encode(&param_string)
        );
        let signing_key = format!(
            "{}&{}",
            percent_encode(&consumer.secret),
            percent_encode(&tokens.secret)
        );

        oauth_params.push(("oauth_signature".to_string(), hmac_sha1(&signing_key, &base_string)));

        let header = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect::<Vec<_>>()
            .join(", ");

        format!("OAuth {header}")
    }
}

impl RequestSigner for OAuth1Signer {
    fn authorization(
        &self,
        method: &Method,
        url: &Url,
        consumer: &ConsumerCredentials,
        auth: &AuthContext,
    ) -> Result<Option<HeaderValue>> {
        let value = match auth {
            AuthContext::User(tokens) | AuthContext::App(tokens) => {
                let timestamp = chrono::Utc::now().timestamp().to_string();
                let nonce = Uuid::new_v4().simple().to_string();
                self.sign_with(method, url, consumer, tokens, &timestamp, &nonce, &[])
            }
            AuthContext::Bearer(token) => format!("Bearer {token}"),
            AuthContext::None => return Ok(None),
        };

        HeaderValue::from_str(&value)
            .map(Some)
            .map_err(|e| ActivityError::Auth(format!("Invalid authorization header: {e}")))
    }
}

/// Percent-encode a string according to RFC 3986
fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, OAUTH_ENCODE_SET).to_string()
}

fn hmac_sha1(key: &str, data: &str) -> String {
    let mut mac = HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC can take any size key");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// RFC 1738 style encoding used by the token endpoint's Basic credentials:
/// `!'()*` are percent-encoded and spaces become `+`
pub fn rfc1738(s: &str) -> String {
    percent_encode(s).replace("%20", "+")
}

/// `Basic` credentials for the client-credentials grant
pub fn basic_credentials(consumer: &ConsumerCredentials) -> String {
    let joined = format!("{}:{}", rfc1738(&consumer.key), rfc1738(&consumer.secret));
    BASE64.encode(joined.as_bytes())
}
