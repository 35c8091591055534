//! Echo route for throughput testing.
//!
//! Replies with the same kind and payload it received, through the buffered
//! send path so bulk traffic is subject to the connection's send buffer.

use crate::request::Request;
use crate::router::Router;
use async_trait::async_trait;
use tracing::warn;

/// Message kind served by [`EchoRouter`].
pub const KIND: u32 = 1;

pub struct EchoRouter;

#[async_trait]
impl Router for EchoRouter {
    async fn pre_handle(&self, _request: &Request) {}

    async fn handle(&self, request: &Request) {
        let conn = request.connection();
        if let Err(e) = conn.send_buffered(request.kind(), request.data()).await {
            warn!(conn_id = conn.id(), error = %e, "Failed to echo payload");
        }
    }

    async fn post_handle(&self, _request: &Request) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::protocol::{DataPack, HEADER_LEN};
    use crate::testing::{connected_pair, test_context};
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_echo_reply() {
        let ctx = test_context(0, 0);
        let (conn, mut peer) = connected_pair(&ctx, 1).await;
        tokio::spawn(Arc::clone(&conn).start());

        let message = Message::new(KIND, b"abc".to_vec()).unwrap();
        let request = Request::new(Arc::clone(&conn), message);
        EchoRouter.handle(&request).await;

        let mut reply = [0u8; HEADER_LEN + 3];
        peer.read_exact(&mut reply).await.unwrap();
        let header = DataPack::default().decode(&reply).unwrap();
        assert_eq!(header.kind, KIND);
        assert_eq!(header.length, 3);
        assert_eq!(&reply[HEADER_LEN..], b"abc");

        conn.stop();
    }
}
