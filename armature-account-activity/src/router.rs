//! Event routing from inbound payloads to subscriber streams

use crate::fanout::{Fanout, Listener};
use crate::{ActivityEvent, ActivityKind, InboundPayload, ObservedEvent, SubscriberRegistry};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// What a dispatch did, for host-side logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Events emitted on the global stream
    pub events_routed: usize,

    /// Whether a subscriber stream for the account existed
    pub account_stream: bool,

    /// Whether the payload went to the unknown-event stream
    pub unknown: bool,
}

/// Routes inbound payloads onto account streams and the global streams.
///
/// The router only ever looks streams up; creating one is the job of
/// `subscribe` / `get_user_activity`.
#[derive(Debug, Clone)]
pub struct EventRouter {
    registry: SubscriberRegistry,
    events: Arc<Fanout<ObservedEvent>>,
    unknown: Arc<Fanout<Value>>,
}

impl EventRouter {
    /// Create a router over `registry`
    pub fn new(registry: SubscriberRegistry) -> Self {
        Self {
            registry,
            events: Arc::new(Fanout::new()),
            unknown: Arc::new(Fanout::new()),
        }
    }

    /// The registry consulted on dispatch
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Listen to every routed event, whatever the account
    pub fn events(&self) -> Listener<ObservedEvent> {
        self.events.listen()
    }

    /// Listen to payloads matching no known shape
    pub fn unknown_events(&self) -> Listener<Value> {
        self.unknown.listen()
    }

    /// Route one payload
    pub fn dispatch(&self, payload: InboundPayload) -> DispatchSummary {
        match payload {
            InboundPayload::AccountBatch {
                for_user_id,
                fields,
            } => {
                let stream = self.registry.get(&for_user_id);
                let mut summary = DispatchSummary {
                    account_stream: stream.is_some(),
                    ..DispatchSummary::default()
                };

                for field in fields {
                    for event in field.events {
                        if let Some(stream) = &stream {
                            stream.emit(ActivityEvent::new(field.kind.clone(), event.clone()));
                        }
                        self.events.send(ObservedEvent {
                            kind: field.kind.clone(),
                            account_id: for_user_id.clone(),
                            payload: event,
                        });
                        summary.events_routed += 1;
                    }
                }

                debug!(
                    account_id = %for_user_id,
                    events = summary.events_routed,
                    subscribed = summary.account_stream,
                    "Routed account activity batch"
                );
                summary
            }
            InboundPayload::Revoke { user_id, revoke } => {
                let retired = self.registry.retire(
                    &user_id,
                    ActivityEvent::new(ActivityKind::Revoke, revoke.clone()),
                );
                self.events.send(ObservedEvent {
                    kind: ActivityKind::Revoke,
                    account_id: user_id.clone(),
                    payload: revoke,
                });

                debug!(account_id = %user_id, retired, "Routed revoke notification");
                DispatchSummary {
                    events_routed: 1,
                    account_stream: retired,
                    unknown: false,
                }
            }
            InboundPayload::Unknown(payload) => {
                warn!("Received account activity payload of unknown shape");
                self.unknown.send(payload);
                DispatchSummary {
                    unknown: true,
                    ..DispatchSummary::default()
                }
            }
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(SubscriberRegistry::new())
    }
}
