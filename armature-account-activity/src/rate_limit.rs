//! Provider rate-limit bookkeeping

use dashmap::DashMap;
use http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Header carrying the request quota of the current window
pub const LIMIT_HEADER: &str = "x-rate-limit-limit";

/// Header carrying the requests left in the current window
pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";

/// Header carrying the window reset time (Unix seconds)
pub const RESET_HEADER: &str = "x-rate-limit-reset";

/// Snapshot of provider-reported throttling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum number of requests allowed in the window
    pub limit: u64,

    /// Remaining requests in the current window
    pub remaining: u64,

    /// Unix timestamp when the window resets
    pub reset_epoch_seconds: u64,
}

impl RateLimit {
    /// Parse rate-limit headers; all three must be present and numeric
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            limit: header_number(headers, LIMIT_HEADER)?,
            remaining: header_number(headers, REMAINING_HEADER)?,
            reset_epoch_seconds: header_number(headers, RESET_HEADER)?,
        })
    }

    /// Whether the window is used up
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Time left until the window resets, if it lies in the future
    pub fn time_until_reset(&self) -> Option<Duration> {
        let now = u64::try_from(chrono::Utc::now().timestamp()).ok()?;
        self.reset_epoch_seconds
            .checked_sub(now)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Outbound operation kinds, each with its own rate-limit slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterWebhook,
    UnregisterWebhook,
    GetWebhooks,
    GetWebhook,
    TriggerChallengeResponseCheck,
    Subscribe,
    Unsubscribe,
    IsSubscribed,
    GetSubscriptions,
    GetSubscriptionsCount,
}

impl Operation {
    /// Stable name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterWebhook => "register_webhook",
            Self::UnregisterWebhook => "unregister_webhook",
            Self::GetWebhooks => "get_webhooks",
            Self::GetWebhook => "get_webhook",
            Self::TriggerChallengeResponseCheck => "trigger_challenge_response_check",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::IsSubscribed => "is_subscribed",
            Self::GetSubscriptions => "get_subscriptions",
            Self::GetSubscriptionsCount => "get_subscriptions_count",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest rate-limit snapshot per operation kind
#[derive(Debug, Clone, Default)]
pub struct RateLimitLedger {
    entries: Arc<DashMap<Operation, RateLimit>>,
}

impl RateLimitLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot for `operation`; `None` clears it
    pub fn record(&self, operation: Operation, rate_limit: Option<RateLimit>) {
        match rate_limit {
            Some(rate_limit) => {
                self.entries.insert(operation, rate_limit);
            }
            None => {
                self.entries.remove(&operation);
            }
        }
    }

    /// Most recent snapshot for `operation`
    pub fn get(&self, operation: Operation) -> Option<RateLimit> {
        self.entries.get(&operation).map(|entry| *entry)
    }

    /// Forget every snapshot
    pub fn clear(&self) {
        self.entries.clear();
    }
}
