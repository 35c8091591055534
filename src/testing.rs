//! Helpers shared by unit tests.

use crate::connection::{Connection, ConnectionContext};
use crate::dispatch::Dispatcher;
use crate::protocol::DataPack;
use crate::registry::ConnectionRegistry;
use crate::server::Hooks;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub(crate) fn bare_context(max_packet_size: u32) -> ConnectionContext {
    ConnectionContext {
        registry: Arc::new(ConnectionRegistry::new()),
        dispatcher: Arc::new(Dispatcher::new(0, 0)),
        hooks: Arc::new(Hooks::default()),
        codec: DataPack::new(max_packet_size),
        send_buffer_len: 16,
        read_timeout: None,
        write_timeout: None,
    }
}

pub(crate) fn context_from(ctx: ConnectionContext) -> Arc<ConnectionContext> {
    Arc::new(ctx)
}

pub(crate) fn test_context(max_packet_size: u32, pool_size: usize) -> Arc<ConnectionContext> {
    test_context_with(Dispatcher::new(pool_size, 16), Hooks::default(), max_packet_size)
}

pub(crate) fn test_context_with(
    dispatcher: Dispatcher,
    hooks: Hooks,
    max_packet_size: u32,
) -> Arc<ConnectionContext> {
    Arc::new(ConnectionContext {
        dispatcher: Arc::new(dispatcher),
        hooks: Arc::new(hooks),
        ..bare_context(max_packet_size)
    })
}

/// Build a connection over a loopback socket, returning it with the peer end.
pub(crate) async fn connected_pair(
    ctx: &Arc<ConnectionContext>,
    id: u32,
) -> (Arc<Connection>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (peer, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (stream, remote_addr) = accepted.unwrap();

    let conn = Connection::new(id, stream, remote_addr, Arc::clone(ctx));
    (conn, peer.unwrap())
}
