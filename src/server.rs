//! TCP server: accept loop, connection admission and lifecycle hooks.
//!
//! Routes and hooks are configured on a `Server` before `start()`. Once the
//! accept loop runs they are shared with every connection and can no longer
//! change.

use crate::config::Config;
use crate::connection::{signalled, Connection, ConnectionContext};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::protocol::DataPack;
use crate::registry::ConnectionRegistry;
use crate::router::Router;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Callback fired on connection start or stop.
pub type ConnectionHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Connection lifecycle hooks. A missing hook is a no-op.
#[derive(Clone, Default)]
pub struct Hooks {
    on_start: Option<ConnectionHook>,
    on_stop: Option<ConnectionHook>,
}

impl Hooks {
    pub fn set_on_start<F>(&mut self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
    }

    pub fn set_on_stop<F>(&mut self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_stop = Some(Arc::new(hook));
    }

    pub fn call_on_connection_start(&self, conn: &Arc<Connection>) {
        if let Some(hook) = &self.on_start {
            debug!(conn_id = conn.id(), "Calling connection start hook");
            hook(conn);
        }
    }

    pub fn call_on_connection_stop(&self, conn: &Arc<Connection>) {
        if let Some(hook) = &self.on_stop {
            debug!(conn_id = conn.id(), "Calling connection stop hook");
            hook(conn);
        }
    }
}

/// Server instance
pub struct Server {
    config: Config,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    hooks: Arc<Hooks>,
    shutdown: watch::Sender<bool>,
    local_addr: OnceLock<SocketAddr>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let dispatcher = Dispatcher::from_config(&config);
        let (shutdown, _) = watch::channel(false);

        Server {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            dispatcher: Arc::new(dispatcher),
            hooks: Arc::new(Hooks::default()),
            shutdown,
            local_addr: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register the handler for a message kind. Only allowed before `start()`.
    pub fn add_route<R>(&mut self, kind: u32, router: R) -> Result<()>
    where
        R: Router + 'static,
    {
        Arc::get_mut(&mut self.dispatcher)
            .ok_or(Error::ServerStarted)?
            .add_route(kind, router)
    }

    pub fn set_on_connection_start<F>(&mut self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.hooks) {
            Some(hooks) => hooks.set_on_start(hook),
            None => warn!("Server already started, ignoring connection start hook"),
        }
    }

    pub fn set_on_connection_stop<F>(&mut self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        match Arc::get_mut(&mut self.hooks) {
            Some(hooks) => hooks.set_on_stop(hook),
            None => warn!("Server already started, ignoring connection stop hook"),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Start the worker pool and the accept loop.
    ///
    /// Returns the bound address once the listener is up.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.local_addr.get().is_some() {
            return Err(Error::ServerStarted);
        }

        info!(
            name = %self.config.name,
            version = %self.config.version,
            host = %self.config.host,
            port = self.config.port,
            max_connections = self.config.max_connections,
            max_packet_size = self.config.max_packet_size,
            workers = self.config.worker_pool_size,
            "Starting server"
        );

        self.dispatcher.start_worker_pool();

        let bind_address = self.config.bind_address();
        let addr = tokio::net::lookup_host(bind_address.as_str())
            .await?
            .next()
            .ok_or_else(|| Error::AddrResolution(bind_address.clone()))?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        let local_addr = listener.local_addr()?;
        self.local_addr
            .set(local_addr)
            .map_err(|_| Error::ServerStarted)?;

        let ctx = Arc::new(ConnectionContext {
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
            hooks: Arc::clone(&self.hooks),
            codec: DataPack::new(self.config.max_packet_size),
            send_buffer_len: self.config.send_buffer_len,
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
        });

        tokio::spawn(accept_loop(
            listener,
            ctx,
            self.config.max_connections,
            self.shutdown.subscribe(),
        ));

        info!(address = %local_addr, name = %self.config.name, "Server listening");
        Ok(local_addr)
    }

    /// Stop accepting and tear down every live connection.
    pub fn stop(&self) {
        info!(name = %self.config.name, "Stopping server");
        self.shutdown.send_replace(true);
        self.registry.clear();
    }

    /// Start, then run until Ctrl-C.
    pub async fn serve(&self) -> Result<()> {
        self.start().await?;
        tokio::signal::ctrl_c().await?;
        self.stop();
        Ok(())
    }
}

/// Accept connections until shutdown is signalled.
async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    // Ids are unique among live connections of this server
    let mut next_id: u32 = 0;

    loop {
        let accepted = tokio::select! {
            _ = signalled(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        if ctx.registry.count() >= max_connections {
            warn!(peer = %peer, max_connections, "Connection limit reached, rejecting");
            drop(stream);
            continue;
        }

        // Skip ids still held by live connections once the counter wraps
        let mut id = next_id;
        while ctx.registry.contains(id) {
            id = id.wrapping_add(1);
        }
        next_id = id.wrapping_add(1);
        debug!(conn_id = id, peer = %peer, "New connection");

        let conn = Connection::new(id, stream, peer, Arc::clone(&ctx));
        ctx.registry.add(Arc::clone(&conn));
        tokio::spawn(conn.start());
    }

    info!("Accept loop stopped");
}

/// Create a listening socket with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
