use std::{
    io::{self, ErrorKind, Read, Write},
    net::TcpStream,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::executor::QueryExecutor;

use super::{
    ErrorCode, ProtocolTransport, QueryResult, Request, Response, transport::TransportError,
};

/// Per-connection limits shared by every handler of a listener.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_frame_size: u32,
    /// Budget for receiving one request, and separately for sending its reply.
    pub io_timeout: Option<Duration>,
}

/// Stream wrapper that fails reads and writes once the running budget is spent.
///
/// The budget covers a whole phase (one request frame, or one reply), not a
/// single socket call, so a peer feeding a frame a byte at a time cannot hold
/// the handler past it. Paired with a socket timeout of the same length, a
/// phase overruns its budget by at most one blocked call.
pub struct Deadline<T> {
    inner: T,
    budget: Option<Duration>,
    expires: Option<Instant>,
}

impl<T> Deadline<T> {
    pub fn new(inner: T, budget: Option<Duration>) -> Self {
        Self {
            inner,
            budget,
            expires: None,
        }
    }

    /// Starts a fresh budget for the next phase.
    pub fn restart(&mut self) {
        self.expires = self.budget.map(|budget| Instant::now() + budget);
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn check(&self) -> io::Result<()> {
        match self.expires {
            Some(expires) if Instant::now() >= expires => Err(io::Error::new(
                ErrorKind::TimedOut,
                "connection exceeded its I/O deadline",
            )),
            _ => Ok(()),
        }
    }
}

impl<T: Read> Read for Deadline<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl<T: Write> Write for Deadline<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Services one accepted connection until the peer leaves, then closes it.
///
/// Failures are logged and contained here; nothing reaches the accept loop.
pub fn handle_connection(stream: TcpStream, executor: &QueryExecutor, limits: ConnectionLimits) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown peer".to_string());
    info!("accepted connection from {peer}");

    if let Err(e) = stream
        .set_read_timeout(limits.io_timeout)
        .and_then(|_| stream.set_write_timeout(limits.io_timeout))
    {
        warn!("failed to set timeouts for {peer}: {e}");
    }

    let stream = Deadline::new(stream, limits.io_timeout);
    let mut transport = ProtocolTransport::with_max_frame_size(stream, limits.max_frame_size);
    match serve_connection(&mut transport, executor) {
        Ok(()) => info!("closed connection from {peer}"),
        Err(TransportError::Io(e))
            if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
        {
            info!("connection from {peer} timed out")
        }
        Err(e) => warn!("dropped connection from {peer}: {e}"),
    }
}

/// Runs request/response exchanges over one transport.
///
/// Returns `Ok` when the peer hangs up between exchanges or asks to close.
/// A request frame that is oversized or undecodable is answered with a
/// `Frame` error before the connection is given up; a broken transport is
/// given up without a reply. Receiving a request and sending its reply each
/// get a fresh [`Deadline`] budget.
pub fn serve_connection<T: Read + Write>(
    transport: &mut ProtocolTransport<Deadline<T>>,
    executor: &QueryExecutor,
) -> Result<(), TransportError> {
    loop {
        transport.get_mut().restart();
        let req = match transport.read_request() {
            Ok(req) => req,
            Err(TransportError::Closed) => return Ok(()),
            Err(TransportError::Frame(e)) => {
                warn!("rejecting request frame: {e}");
                let resp = Response::Result(QueryResult::error(ErrorCode::Frame, e.to_string()));
                if let Err(write_err) = transport.write_response(&resp) {
                    debug!("could not report frame error: {write_err}");
                }
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let resp = match req {
            Request::Query { sql, params } => {
                info!("received query: {sql}");
                let result = executor.execute(&sql, &params);
                debug!("query produced {} row(s)", result.rows().len());
                Response::Result(result)
            }
            Request::Ping => Response::Pong,
            Request::CloseConnection => {
                transport.get_mut().restart();
                transport.write_response(&Response::ConnectionClosed)?;
                return Ok(());
            }
        };

        transport.get_mut().restart();
        match transport.write_response(&resp) {
            Ok(()) => {}
            // Nothing reached the socket, so the peer can still be told.
            Err(e @ (TransportError::Frame(_) | TransportError::Serialize(_))) => {
                warn!("could not send result: {e}");
                let resp = Response::Result(QueryResult::error(
                    ErrorCode::Frame,
                    format!("result could not be sent: {e}"),
                ));
                transport.write_response(&resp)?;
            }
            Err(e) => return Err(e),
        }
    }
}
