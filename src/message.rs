//! Message value type.

use crate::error::{Error, Result};
use bytes::Bytes;

/// One decoded frame: kind, payload length and payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: u32,
    length: u32,
    payload: Bytes,
}

impl Message {
    /// Create a message, failing if the payload does not fit a frame.
    pub fn new(kind: u32, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let length =
            u32::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge(payload.len()))?;
        Ok(Self {
            kind,
            length,
            payload,
        })
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn len(&self) -> u32 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
