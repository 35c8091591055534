//! Message routing and the dispatch worker pool.
//!
//! Requests are either dispatched on a fresh task each (pool size 0), or
//! queued to one of N workers. A connection always maps to worker
//! `id % N`, so its requests are handled one at a time and in arrival order.
//! A full worker queue blocks the connection's reader, which is how slow
//! handlers push back on socket reads.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::router::Router;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Routers by message kind, shared with the workers.
struct RouteTable {
    routes: HashMap<u32, Arc<dyn Router>>,
    handler_timeout: Option<Duration>,
}

impl RouteTable {
    async fn dispatch(&self, request: &Request) {
        let Some(router) = self.routes.get(&request.kind()) else {
            warn!(
                conn_id = request.connection().id(),
                kind = request.kind(),
                "No route for message kind, dropping request"
            );
            return;
        };

        let pipeline = async {
            router.pre_handle(request).await;
            router.handle(request).await;
            router.post_handle(request).await;
        };

        match self.handler_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, pipeline).await.is_err() {
                    warn!(
                        conn_id = request.connection().id(),
                        kind = request.kind(),
                        timeout_ms = limit.as_millis() as u64,
                        "Handler timed out"
                    );
                }
            }
            None => pipeline.await,
        }
    }
}

/// Routing table plus worker pool.
///
/// Workers share only the routing table. Dropping the dispatcher closes
/// the queues, and each worker exits once its queue is drained.
pub struct Dispatcher {
    table: Arc<RouteTable>,
    pool_size: usize,
    queue_len: usize,
    /// One sender per worker, set once the pool is running.
    queues: OnceLock<Vec<mpsc::Sender<Request>>>,
}

impl Dispatcher {
    pub fn new(pool_size: usize, queue_len: usize) -> Self {
        Self {
            table: Arc::new(RouteTable {
                routes: HashMap::new(),
                handler_timeout: None,
            }),
            pool_size,
            queue_len,
            queues: OnceLock::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.worker_pool_size, config.worker_queue_len)
            .with_handler_timeout(config.handler_timeout)
    }

    /// Bound the time a request may spend in the handler pipeline.
    ///
    /// Ignored once the worker pool is running.
    pub fn with_handler_timeout(mut self, handler_timeout: Option<Duration>) -> Self {
        match Arc::get_mut(&mut self.table) {
            Some(table) => table.handler_timeout = handler_timeout,
            None => warn!("Worker pool running, handler timeout unchanged"),
        }
        self
    }

    /// Register the handler for a message kind.
    ///
    /// Must happen before any traffic flows. A kind can only be registered
    /// once, and the table is frozen once the worker pool is running.
    pub fn add_route<R>(&mut self, kind: u32, router: R) -> Result<()>
    where
        R: Router + 'static,
    {
        let table = Arc::get_mut(&mut self.table).ok_or(Error::ServerStarted)?;
        match table.routes.entry(kind) {
            Entry::Occupied(_) => Err(Error::DuplicateRoute(kind)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(router));
                info!(kind, "Route added");
                Ok(())
            }
        }
    }

    pub fn has_route(&self, kind: u32) -> bool {
        self.table.routes.contains_key(&kind)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Worker that handles every request of the given connection.
    pub fn worker_index(&self, conn_id: u32) -> Option<usize> {
        (self.pool_size > 0).then(|| conn_id as usize % self.pool_size)
    }

    /// Run the handler pipeline for a request on the current task.
    pub async fn dispatch(&self, request: &Request) {
        self.table.dispatch(request).await;
    }

    /// Allocate the worker queues and spawn one task per worker.
    ///
    /// Does nothing when the pool size is 0 or the pool is already running.
    pub fn start_worker_pool(&self) {
        if self.pool_size == 0 {
            return;
        }

        let capacity = self.queue_len.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..self.pool_size).map(|_| mpsc::channel(capacity)).unzip();

        if self.queues.set(senders).is_err() {
            debug!("Worker pool already running");
            return;
        }

        for (worker_id, queue) in receivers.into_iter().enumerate() {
            tokio::spawn(worker_loop(Arc::clone(&self.table), worker_id, queue));
        }

        info!(
            workers = self.pool_size,
            queue_len = capacity,
            "Worker pool started"
        );
    }

    /// Queue a request to the worker owning its connection.
    ///
    /// Waits while that worker's queue is full.
    pub async fn enqueue(&self, request: Request) -> Result<()> {
        let queues = self.queues.get().ok_or(Error::WorkerPoolUnavailable)?;
        let worker = request.connection().id() as usize % queues.len();

        trace!(
            conn_id = request.connection().id(),
            kind = request.kind(),
            worker,
            "Queueing request"
        );

        queues[worker]
            .send(request)
            .await
            .map_err(|_| Error::WorkerPoolUnavailable)
    }

    /// Hand a freshly decoded request to the pool, or to its own task when
    /// no pool is configured.
    pub async fn submit(&self, request: Request) -> Result<()> {
        if self.pool_size > 0 {
            return self.enqueue(request).await;
        }

        let table = Arc::clone(&self.table);
        tokio::spawn(async move {
            table.dispatch(&request).await;
        });
        Ok(())
    }
}

async fn worker_loop(table: Arc<RouteTable>, worker_id: usize, mut queue: mpsc::Receiver<Request>) {
    debug!(worker = worker_id, "Worker started");

    while let Some(request) = queue.recv().await {
        trace!(
            worker = worker_id,
            conn_id = request.connection().id(),
            kind = request.kind(),
            "Handling request"
        );
        table.dispatch(&request).await;
    }

    debug!(worker = worker_id, "Worker stopped");
}
