//! Ping route for health checks and latency measurement.
//!
//! ```text
//! Request:  kind 0, payload ""        Response: kind 0, payload "pong"
//! Request:  kind 0, payload "hello"   Response: kind 0, payload "pong hello"
//! ```

use crate::request::Request;
use crate::router::Router;
use async_trait::async_trait;
use tracing::{trace, warn};

/// Message kind served by [`PingRouter`].
pub const KIND: u32 = 0;

pub struct PingRouter;

/// Build the reply payload for a ping.
pub fn response_pong(payload: &[u8]) -> Vec<u8> {
    if payload.is_empty() {
        return b"pong".to_vec();
    }
    let mut resp = Vec::with_capacity(5 + payload.len());
    resp.extend_from_slice(b"pong ");
    resp.extend_from_slice(payload);
    resp
}

#[async_trait]
impl Router for PingRouter {
    async fn pre_handle(&self, request: &Request) {
        trace!(conn_id = request.connection().id(), "Ping received");
    }

    async fn handle(&self, request: &Request) {
        let reply = response_pong(request.data());
        if let Err(e) = request.connection().send_message(KIND, &reply).await {
            warn!(conn_id = request.connection().id(), error = %e, "Failed to send pong");
        }
    }

    async fn post_handle(&self, request: &Request) {
        trace!(conn_id = request.connection().id(), "Pong sent");
    }
}
