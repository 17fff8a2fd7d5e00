//! The server shell: listener, accept loop, and handler registry.
//!
//! Each accepted socket gets its own task running a [`Connection`] to
//! completion; everything inside the task is sequential blocking-style
//! I/O. Shutdown cancels the accept loop and the in-flight connection
//! tasks through a shared cancellation token.

use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::net::{TcpListener, TcpSocket, ToSocketAddrs};
use tokio::select;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::Connection;
use crate::handler::HttpHandler;

pub(crate) struct ServerShared {
    pub config: Config,
    pub handlers: ArcSwap<Vec<Box<dyn HttpHandler>>>,
}

pub struct Server {
    shared: Arc<ServerShared>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            shared: Arc::new(ServerShared { config, handlers: ArcSwap::from_pointee(Vec::new()) }),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            acceptor: Mutex::new(None),
        }
    }

    pub fn set_handler(&self, handler: Box<dyn HttpHandler>) {
        self.set_handlers(vec![handler]);
    }

    /// Replaces the handler chain. Connections in flight keep the snapshot
    /// they started their current request with; displaced handlers get their
    /// `cleanup` hook.
    pub fn set_handlers(&self, handlers: Vec<Box<dyn HttpHandler>>) {
        if handlers.is_empty() {
            panic!("can't take no handlers");
        }
        for handler in &handlers {
            handler.added_to_server();
        }
        let displaced = self.shared.handlers.swap(Arc::new(handlers));
        for handler in displaced.iter() {
            handler.cleanup();
        }
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn start<A: ToSocketAddrs>(&self, addr: A) -> io::Result<()> {
        let addr = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to bind"))?;
        let listener = bind_reusable(addr)?;
        info!("listening on {}", listener.local_addr()?);

        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let tracker = self.tracker.clone();

        let handle = tokio::spawn(async move {
            accept_loop(listener, shared, shutdown, tracker).await;
        });

        let mut acceptor = self.acceptor.lock().expect("acceptor lock poisoned");
        *acceptor = Some(handle);
        Ok(())
    }

    /// Stops accepting, cancels in-flight connection tasks, and runs the
    /// handlers' cleanup hooks.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.tracker.close();

        let handle = self.acceptor.lock().expect("acceptor lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.tracker.wait().await;

        for handler in self.shared.handlers.load().iter() {
            handler.cleanup();
        }
    }

    /// Waits for the accept loop to end.
    pub async fn join(&self) {
        let handle = self.acceptor.lock().expect("acceptor lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Drives a single already-established connection to completion. Useful
    /// for embedding and for exercising the server over in-memory streams.
    pub async fn serve_connection(
        &self,
        reader: impl tokio::io::AsyncRead + Send + Sync + Unpin + 'static,
        writer: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ) {
        Connection::new(self.shared.clone(), reader, writer).run().await;
    }
}

/// Binds with SO_REUSEADDR so a restart does not have to wait out TIME_WAIT.
fn bind_reusable(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let (stream, remote_addr) = select! {
            _ = shutdown.cancelled() => {
                debug!("accept loop shutting down");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("failed to accept: {e}");
                    continue;
                }
            },
        };

        debug!("accepted connection from {remote_addr}");

        let shared = shared.clone();
        let shutdown = shutdown.clone();
        tracker.spawn(async move {
            let (reader, writer) = stream.into_split();
            let connection = Connection::new(shared, reader, writer);
            select! {
                _ = shutdown.cancelled() => {
                    debug!("connection task cancelled by shutdown");
                }
                _ = connection.run() => {}
            }
        });
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
        }
    }
}
