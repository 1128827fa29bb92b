use std::{
    fmt, io,
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;

use crate::{ServerConfig, executor::QueryExecutor};

use super::{
    ErrorCode, ProtocolTransport, QueryResult, Response, ThreadPool,
    handler::{ConnectionLimits, handle_connection},
};

/// Pause between accept attempts while no connection is pending.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Write timeout for the single frame sent to a rejected connection.
const BUSY_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listener IO error: {0}")]
    Io(#[from] io::Error),
}

/// Cancels a running [`QueryServer`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops future accepts. In-flight connections are left to finish.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// TCP listener serving queries against one database file.
///
/// [`QueryServer::bind`] leaves the socket bound and listening;
/// [`QueryServer::listen`] accepts until the [`ShutdownHandle`] fires, then
/// closes the socket and drains the worker pool.
pub struct QueryServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    executor: Arc<QueryExecutor>,
    pool: ThreadPool,
    shutdown: ShutdownHandle,
}

impl QueryServer {
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.endpoint()?;
        let listener = bind_listener(addr, config.backlog)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            executor: Arc::new(
                QueryExecutor::new(config.database.clone()).with_timeout(config.io_timeout),
            ),
            pool: ThreadPool::new(config.workers.max(1), config.queue),
            shutdown: ShutdownHandle::new(),
            config,
            listener,
            local_addr,
        })
    }

    /// Replaces the server's own shutdown handle with one the caller holds.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn listen(self) -> Result<(), ServerError> {
        info!("listening at {}", self.local_addr);
        let limits = ConnectionLimits {
            max_frame_size: self.config.max_frame_size,
            io_timeout: self.config.io_timeout,
        };

        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, addr)) => self.dispatch(stream, addr, limits),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("broken connection: {e:?}");
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        let QueryServer {
            listener,
            mut pool,
            config,
            local_addr,
            ..
        } = self;
        drop(listener);
        info!(
            "stopped listening at {local_addr}; draining {} connection(s)",
            pool.in_flight()
        );

        let abandoned = pool.shutdown(config.shutdown_timeout);
        if abandoned > 0 {
            warn!("abandoned {abandoned} worker(s) at shutdown deadline");
        }
        info!("server stopped");
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, addr: SocketAddr, limits: ConnectionLimits) {
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("dropping connection from {addr}: {e}");
            return;
        }

        if self.pool.is_saturated() {
            reject_busy(stream, addr, limits);
            return;
        }

        let executor = Arc::clone(&self.executor);
        if let Err(e) = self
            .pool
            .execute(move || handle_connection(stream, &executor, limits))
        {
            error!("failed to dispatch connection from {addr}: {e}");
        }
    }
}

impl fmt::Display for QueryServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueryServer(host='{}', port={}, db='{}')",
            self.local_addr.ip(),
            self.local_addr.port(),
            self.config.database.display()
        )
    }
}

/// Binds `endpoint` and serves `database` until `shutdown` fires.
pub fn serve(
    endpoint: SocketAddr,
    database: impl Into<PathBuf>,
    max_pending: i32,
    shutdown: ShutdownHandle,
) -> Result<(), ServerError> {
    let config = ServerConfig {
        host: endpoint.ip().to_string(),
        port: endpoint.port(),
        database: database.into(),
        backlog: max_pending,
        ..Default::default()
    };
    QueryServer::bind(config)?.with_shutdown(shutdown).listen()
}

fn bind_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn reject_busy(stream: TcpStream, addr: SocketAddr, limits: ConnectionLimits) {
    warn!("server busy, rejecting connection from {addr}");
    if let Err(e) = stream.set_write_timeout(Some(BUSY_WRITE_TIMEOUT)) {
        debug!("failed to set write timeout for {addr}: {e}");
    }

    let mut transport = ProtocolTransport::with_max_frame_size(stream, limits.max_frame_size);
    let resp = Response::Result(QueryResult::error(
        ErrorCode::Busy,
        "server busy, try again later",
    ));
    if let Err(e) = transport.write_response(&resp) {
        debug!("could not notify {addr} of busy server: {e}");
    }
    if let Err(e) = transport.into_inner().shutdown(Shutdown::Write) {
        debug!("failed to shut down busy connection from {addr}: {e}");
    }
}
