//! Webhook receiver for the provider's inbound calls
//!
//! The receiver answers the challenge on `GET ?crc_token=…` and accepts event
//! payloads on `POST`. A `POST` is acknowledged before anything is routed:
//! [`WebhookReceiver::handle`] hands back the `200` response together with a
//! [`Dispatch`] that the host runs once the response is on its way.

use crate::challenge::CRC_TOKEN_PARAM;
use crate::{
    ChallengeResponder, ChallengeResponse, ConfigCell, DispatchSummary, EventRouter,
    InboundPayload,
};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of an inbound request
#[derive(Debug)]
pub enum Inbound {
    /// Challenge answered; send the response as is
    Challenge(Response<Bytes>),
    /// Event payload accepted; send the acknowledgment, then run the dispatch
    Accepted(Acknowledged),
    /// Not for this receiver; hand the request to the next handler
    PassThrough,
}

/// An acknowledged event payload awaiting dispatch
#[derive(Debug)]
pub struct Acknowledged {
    pub response: Response<Bytes>,
    pub dispatch: Dispatch,
}

/// Routing work deferred until after the acknowledgment
#[derive(Debug)]
pub struct Dispatch {
    router: EventRouter,
    payload: InboundPayload,
}

impl Dispatch {
    /// The classified payload
    pub fn payload(&self) -> &InboundPayload {
        &self.payload
    }

    /// Route the payload
    pub fn run(self) -> DispatchSummary {
        self.router.dispatch(self.payload)
    }
}

/// Receiver for inbound webhook calls
#[derive(Debug, Clone)]
pub struct WebhookReceiver {
    config: Arc<ConfigCell>,
    router: EventRouter,
}

impl WebhookReceiver {
    /// Create a receiver reading the consumer secret from `config`
    pub fn new(config: Arc<ConfigCell>, router: EventRouter) -> Self {
        Self { config, router }
    }

    /// Handle an inbound request
    pub fn handle(&self, request: &Request<Bytes>) -> Inbound {
        match *request.method() {
            Method::GET => match crc_token(request) {
                Some(token) => Inbound::Challenge(self.challenge_response(&token)),
                None => Inbound::PassThrough,
            },
            Method::POST => Inbound::Accepted(self.accept(request.body())),
            _ => Inbound::PassThrough,
        }
    }

    /// Answer a challenge with the current consumer secret
    pub fn respond_to_challenge(&self, crc_token: &str) -> ChallengeResponse {
        ChallengeResponder::new(self.config.current().consumer_secret.as_str()).respond(crc_token)
    }

    /// Acknowledge an event body and prepare its dispatch
    pub fn accept(&self, body: &[u8]) -> Acknowledged {
        let payload = InboundPayload::from_slice(body).unwrap_or_else(|err| {
            warn!("Undecodable account activity body: {}", err);
            InboundPayload::Unknown(Value::String(String::from_utf8_lossy(body).into_owned()))
        });

        debug!(events = payload.event_count(), "Accepted account activity payload");

        let mut response = Response::new(Bytes::new());
        *response.status_mut() = StatusCode::OK;

        Acknowledged {
            response,
            dispatch: Dispatch {
                router: self.router.clone(),
                payload,
            },
        }
    }

    fn challenge_response(&self, crc_token: &str) -> Response<Bytes> {
        let reply = self.respond_to_challenge(crc_token);
        let body = serde_json::json!({ "response_token": reply.response_token }).to_string();

        let mut response = Response::new(Bytes::from(body));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

fn crc_token<B>(request: &Request<B>) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(name, _)| name == CRC_TOKEN_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}
