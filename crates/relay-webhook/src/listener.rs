//! Inbound webhook listener
//!
//! One path accepts event notifications; the request path is the only
//! check that a caller is the platform. The acknowledgement is sent without
//! waiting for the event to be dispatched.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use relay_core::InboundEvent;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::dispatcher::EventHandler;

/// Body returned to every GET request
pub const GREETING: &str = "Hello! We're here to listen to requests from Tableau Server webhooks!";

/// Body returned to POST requests on any other path
pub const WRONG_PATH: &str = "Incorrect listener path in URL.";

const ACK_PREFIX: &[u8] = b"This is a POST request! Received: ";

/// Shared state for the listener routes
#[derive(Clone)]
pub struct ListenerState {
    listener_path: Arc<str>,
    handler: Arc<dyn EventHandler>,
    tracker: TaskTracker,
}

impl ListenerState {
    pub fn new(listener_path: &str, handler: Arc<dyn EventHandler>, tracker: TaskTracker) -> Self {
        Self {
            listener_path: Arc::from(listener_path),
            handler,
            tracker,
        }
    }

    pub fn listener_path(&self) -> &str {
        &self.listener_path
    }

    /// Tracks dispatches still running
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }
}

/// Create Axum router for the listener
pub fn create_listener_router(state: ListenerState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(
    State(state): State<ListenerState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    match method {
        Method::GET => {
            debug!(path = %uri.path(), "GET request");
            (StatusCode::OK, GREETING).into_response()
        }
        Method::POST => receive_event(&state, &uri, body),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn receive_event(state: &ListenerState, uri: &Uri, body: Bytes) -> Response {
    info!(path = %uri.path(), bytes = body.len(), "Received POST request");

    if uri.path() != state.listener_path() {
        warn!(path = %uri.path(), "POST on unexpected path");
        return (StatusCode::BAD_REQUEST, WRONG_PATH).into_response();
    }

    match InboundEvent::from_slice(&body) {
        Ok(event) => {
            info!(
                event_type = %event.event_type,
                resource = %event.resource_name,
                "Received event"
            );
            let handler = state.handler.clone();
            state.tracker.spawn(async move {
                handler.handle(event).await;
            });
        }
        Err(e) => {
            warn!(error = %e, "Dropping event that could not be parsed");
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        acknowledgement(&body),
    )
        .into_response()
}

fn acknowledgement(body: &[u8]) -> Vec<u8> {
    let mut ack = Vec::with_capacity(ACK_PREFIX.len() + body.len());
    ack.extend_from_slice(ACK_PREFIX);
    ack.extend_from_slice(body);
    ack
}
