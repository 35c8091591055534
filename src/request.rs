//! A decoded message paired with the connection it arrived on.

use crate::connection::Connection;
use crate::message::Message;
use bytes::Bytes;
use std::sync::Arc;

/// Unit of work handed to the dispatcher, one per decoded frame.
#[derive(Clone)]
pub struct Request {
    connection: Arc<Connection>,
    message: Message,
}

impl Request {
    pub fn new(connection: Arc<Connection>, message: Message) -> Self {
        Self {
            connection,
            message,
        }
    }

    /// The connection this request arrived on.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn kind(&self) -> u32 {
        self.message.kind()
    }

    pub fn data(&self) -> &Bytes {
        self.message.payload()
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("conn_id", &self.connection.id())
            .field("kind", &self.message.kind())
            .field("length", &self.message.len())
            .finish()
    }
}
