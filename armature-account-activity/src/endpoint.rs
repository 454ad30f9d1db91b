//! Provider-side webhook and subscription descriptors

use serde::{Deserialize, Deserializer, Serialize};

/// A webhook registered with the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Provider-assigned webhook id
    pub id: String,

    /// Callback URL the provider delivers to
    pub url: String,

    /// Whether the last challenge check succeeded
    #[serde(default)]
    pub valid: bool,

    /// Provider creation timestamp, verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_timestamp: Option<String>,
}

/// Webhooks of one environment, as listed by the all-environments endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentWebhooks {
    pub environment_name: String,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

/// The shapes a webhook listing comes back in
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WebhookListing {
    /// A bare array of webhooks
    Flat(Vec<Webhook>),
    /// `{"environments": [{"environment_name": …, "webhooks": […]}]}`
    Environments { environments: Vec<EnvironmentWebhooks> },
    /// A single webhook object
    Single(Webhook),
}

impl WebhookListing {
    /// Flatten into webhooks, environments in listing order
    pub fn into_webhooks(self) -> Vec<Webhook> {
        match self {
            Self::Flat(webhooks) => webhooks,
            Self::Environments { environments } => environments
                .into_iter()
                .flat_map(|environment| environment.webhooks)
                .collect(),
            Self::Single(webhook) => vec![webhook],
        }
    }
}

/// A subscribed account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: String,
}

/// Subscription listing of an environment
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Provider-reported subscription counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionsCount {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,

    /// Subscriptions across all activity types
    #[serde(default, deserialize_with = "count")]
    pub subscriptions_count_all: u64,

    /// Subscriptions that include direct messages
    #[serde(default, deserialize_with = "count")]
    pub subscriptions_count_direct_messages: u64,
}

/// Counts arrive as strings (`"3"`) or numbers
fn count<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Number(u64),
        Text(String),
    }

    match Count::deserialize(deserializer)? {
        Count::Number(n) => Ok(n),
        Count::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
