//! A single client connection.
//!
//! Each connection runs two tasks once started:
//! - a reader that decodes frames and submits requests to the dispatcher
//! - a writer that drains the unbuffered and buffered send channels
//!
//! `stop()` raises the exit signal, which ends both tasks and releases the
//! socket halves they own, even mid-read or mid-write. Teardown runs
//! exactly once.

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{DataPack, HEADER_LEN};
use crate::registry::ConnectionRegistry;
use crate::request::Request;
use crate::server::Hooks;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Value stored in a connection's property map.
pub type Property = Arc<dyn Any + Send + Sync>;

/// Server-wide state every connection needs.
pub(crate) struct ConnectionContext {
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) hooks: Arc<Hooks>,
    pub(crate) codec: DataPack,
    pub(crate) send_buffer_len: usize,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

/// Frame passed through the unbuffered path. The writer acknowledges as
/// soon as it takes the frame.
struct Handoff {
    frame: Bytes,
    taken: oneshot::Sender<()>,
}

/// Socket and receivers, held until `start()` hands them to the tasks.
struct PendingIo {
    stream: TcpStream,
    handoff_rx: mpsc::Receiver<Handoff>,
    buffered_rx: mpsc::Receiver<Bytes>,
}

pub struct Connection {
    id: u32,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    closed: AtomicBool,
    properties: RwLock<HashMap<String, Property>>,
    exit: watch::Sender<bool>,
    handoff_tx: mpsc::Sender<Handoff>,
    buffered_tx: mpsc::Sender<Bytes>,
    pending: Mutex<Option<PendingIo>>,
    ctx: Arc<ConnectionContext>,
}

impl Connection {
    /// Wrap an accepted socket. The connection is not registered anywhere
    /// and does no I/O until `start()` is called.
    pub(crate) fn new(
        id: u32,
        stream: TcpStream,
        remote_addr: SocketAddr,
        ctx: Arc<ConnectionContext>,
    ) -> Arc<Self> {
        let (exit, _) = watch::channel(false);
        let (handoff_tx, handoff_rx) = mpsc::channel(1);
        let (buffered_tx, buffered_rx) = mpsc::channel(ctx.send_buffer_len.max(1));

        Arc::new(Self {
            id,
            remote_addr,
            connected_at: Utc::now(),
            closed: AtomicBool::new(false),
            properties: RwLock::new(HashMap::new()),
            exit,
            handoff_tx,
            buffered_tx,
            pending: Mutex::new(Some(PendingIo {
                stream,
                handoff_rx,
                buffered_rx,
            })),
            ctx,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn take_pending(&self) -> Option<PendingIo> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Run the connection until it is stopped.
    ///
    /// Spawns the reader and writer, fires the start hook, then waits for
    /// the exit signal. Calling it a second time returns immediately.
    pub async fn start(self: Arc<Self>) {
        let Some(io) = self.take_pending() else {
            debug!(conn_id = self.id, "Connection already started");
            return;
        };
        if self.is_closed() {
            return;
        }

        let mut exit = self.exit.subscribe();
        let (reader, writer) = io.stream.into_split();

        tokio::spawn(Arc::clone(&self).write_loop(writer, io.handoff_rx, io.buffered_rx));
        tokio::spawn(Arc::clone(&self).read_loop(reader));

        info!(conn_id = self.id, peer = %self.remote_addr, "Connection started");
        self.ctx.hooks.call_on_connection_start(&self);

        signalled(&mut exit).await;
        debug!(conn_id = self.id, "Connection finished");
    }

    /// Tear the connection down. Only the first call has any effect.
    pub fn stop(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!(conn_id = self.id, peer = %self.remote_addr, "Stopping connection");

        // The hook still sees an open socket
        self.ctx.hooks.call_on_connection_stop(self);

        self.exit.send_replace(true);
        self.ctx.registry.remove(self);

        // Never started: the socket is still parked here
        drop(self.take_pending());

        info!(conn_id = self.id, "Connection stopped");
    }

    /// Send a frame and wait until the writer has taken it.
    pub async fn send_message(&self, kind: u32, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let frame = self.ctx.codec.encode(kind, payload)?;

        let (taken, taken_rx) = oneshot::channel();
        self.handoff_tx
            .send(Handoff { frame, taken })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        taken_rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Queue a frame on the bounded send channel.
    ///
    /// Only waits when the channel is full.
    pub async fn send_buffered(&self, kind: u32, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let frame = self.ctx.codec.encode(kind, payload)?;

        self.buffered_tx
            .send(frame)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), Arc::new(value));
    }

    pub fn get_property(&self, key: &str) -> Result<Property> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::PropertyNotFound(key.to_string()))
    }

    /// Typed variant of [`get_property`](Self::get_property).
    pub fn property<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.get_property(key)?
            .downcast::<T>()
            .map_err(|_| Error::PropertyType(key.to_string()))
    }

    pub fn remove_property(&self, key: &str) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    async fn read_loop(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut exit = self.exit.subscribe();

        loop {
            let frame = tokio::select! {
                _ = signalled(&mut exit) => break,
                frame = self.read_frame(&mut reader) => frame,
            };

            let message = match frame {
                Ok(message) => message,
                Err(e) => {
                    debug!(conn_id = self.id, error = %e, "Read failed");
                    break;
                }
            };

            trace!(
                conn_id = self.id,
                kind = message.kind(),
                length = message.len(),
                "Frame received"
            );

            let request = Request::new(Arc::clone(&self), message);
            let submitted = tokio::select! {
                _ = signalled(&mut exit) => break,
                submitted = self.ctx.dispatcher.submit(request) => submitted,
            };

            if let Err(e) = submitted {
                warn!(conn_id = self.id, error = %e, "Failed to submit request");
                break;
            }
        }

        debug!(conn_id = self.id, "Reader exited");
        self.stop();
    }

    /// Read one header and its payload.
    async fn read_frame(&self, reader: &mut OwnedReadHalf) -> Result<Message> {
        let mut header = [0u8; HEADER_LEN];
        with_deadline(self.ctx.read_timeout, reader.read_exact(&mut header)).await?;

        // Size limit is enforced here, before the payload is allocated
        let header = self.ctx.codec.decode(&header)?;

        let mut payload = BytesMut::zeroed(header.length as usize);
        if header.length > 0 {
            with_deadline(self.ctx.read_timeout, reader.read_exact(&mut payload)).await?;
        }

        Message::new(header.kind, payload.freeze())
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: OwnedWriteHalf,
        mut handoff_rx: mpsc::Receiver<Handoff>,
        mut buffered_rx: mpsc::Receiver<Bytes>,
    ) {
        let mut exit = self.exit.subscribe();
        let mut failed = false;

        loop {
            let frame = tokio::select! {
                Some(handoff) = handoff_rx.recv() => {
                    let _ = handoff.taken.send(());
                    handoff.frame
                }
                Some(frame) = buffered_rx.recv() => frame,
                _ = signalled(&mut exit) => break,
                else => break,
            };

            // Abandon an unfinished write once stopped
            let write = with_deadline(self.ctx.write_timeout, writer.write_all(&frame));
            let written = tokio::select! {
                written = write => written,
                _ = signalled(&mut exit) => break,
            };

            if let Err(e) = written {
                warn!(conn_id = self.id, error = %e, "Write failed");
                failed = true;
                break;
            }
            trace!(conn_id = self.id, bytes = frame.len(), "Frame sent");
        }

        let _ = writer.shutdown().await;
        debug!(conn_id = self.id, "Writer exited");

        if failed {
            self.stop();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Resolve once the exit flag is raised, or its sender is gone.
pub(crate) async fn signalled(exit: &mut watch::Receiver<bool>) {
    let _ = exit.wait_for(|stopped| *stopped).await;
}

async fn with_deadline<T>(
    deadline: Option<Duration>,
    op: impl Future<Output = io::Result<T>>,
) -> Result<T> {
    match deadline {
        Some(limit) => Ok(tokio::time::timeout(limit, op).await??),
        None => Ok(op.await?),
    }
}
