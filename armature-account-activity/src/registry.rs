//! Per-account subscriber streams

use crate::ActivityEvent;
use crate::fanout::{Fanout, Listener};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// The live event channel for one account.
///
/// Any number of listeners can attach with [`SubscriberStream::listen`]; each
/// receives every event in order, however far behind it is. Once the stream
/// is closed, listeners drain what was already sent and then see the end.
#[derive(Debug)]
pub struct SubscriberStream {
    account_id: String,
    listeners: Fanout<ActivityEvent>,
}

impl SubscriberStream {
    fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            listeners: Fanout::new(),
        }
    }

    /// The account this stream belongs to
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Attach a listener
    pub fn listen(&self) -> Listener<ActivityEvent> {
        self.listeners.listen()
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }

    /// Whether the stream was detached from the registry
    pub fn is_closed(&self) -> bool {
        self.listeners.is_closed()
    }

    /// Deliver an event; returns whether any listener received it
    pub(crate) fn emit(&self, event: ActivityEvent) -> bool {
        self.listeners.send(event) > 0
    }

    fn close(&self) {
        self.listeners.close();
    }
}

/// Registry mapping account ids to their live streams
#[derive(Debug, Clone)]
pub struct SubscriberRegistry {
    streams: Arc<DashMap<String, Arc<SubscriberStream>>>,
}

impl SubscriberRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
        }
    }

    /// Return the account's stream, creating it if needed
    pub fn get_or_create(&self, account_id: &str) -> Arc<SubscriberStream> {
        self.streams
            .entry(account_id.to_string())
            .or_insert_with(|| {
                debug!(account_id, "Creating subscriber stream");
                Arc::new(SubscriberStream::new(account_id))
            })
            .clone()
    }

    /// Look up the account's stream without creating one
    pub fn get(&self, account_id: &str) -> Option<Arc<SubscriberStream>> {
        self.streams.get(account_id).map(|entry| entry.clone())
    }

    /// Detach and close the account's stream
    pub fn remove(&self, account_id: &str) -> bool {
        match self.streams.remove(account_id) {
            Some((_, stream)) => {
                stream.close();
                info!(account_id, "Removed subscriber stream");
                true
            }
            None => false,
        }
    }

    /// Deliver `terminal` to the account's stream, then detach and close it
    pub fn retire(&self, account_id: &str, terminal: ActivityEvent) -> bool {
        match self.streams.remove(account_id) {
            Some((_, stream)) => {
                let kind = terminal.kind.clone();
                stream.emit(terminal);
                stream.close();
                info!(account_id, reason = %kind, "Retired subscriber stream");
                true
            }
            None => false,
        }
    }

    /// Check if the account has a live stream
    pub fn contains(&self, account_id: &str) -> bool {
        self.streams.contains_key(account_id)
    }

    /// Get the number of live streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether no stream is live
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Accounts with a live stream
    pub fn account_ids(&self) -> Vec<String> {
        self.streams.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}
