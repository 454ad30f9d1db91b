//! Challenge-response check (CRC) for webhook ownership verification

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the provider's challenge
pub const CRC_TOKEN_PARAM: &str = "crc_token";

/// Body returned to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub response_token: String,
}

/// Answers challenges with `sha256=` + base64 HMAC-SHA256 of the token,
/// keyed with the consumer secret
#[derive(Debug, Clone)]
pub struct ChallengeResponder {
    secret: String,
}

impl ChallengeResponder {
    /// Create a responder keyed with the consumer secret
    pub fn new(consumer_secret: impl Into<String>) -> Self {
        Self {
            secret: consumer_secret.into(),
        }
    }

    /// Compute the response token for a challenge
    pub fn response_token(&self, crc_token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can take any size key");
        mac.update(crc_token.as_bytes());
        format!("sha256={}", BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Build the response body for a challenge
    pub fn respond(&self, crc_token: &str) -> ChallengeResponse {
        ChallengeResponse {
            response_token: self.response_token(crc_token),
        }
    }

    /// Check a response token produced for `crc_token`
    pub fn verify(&self, crc_token: &str, response_token: &str) -> bool {
        constant_time_compare(&self.response_token(crc_token), response_token)
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
