use std::{
    fmt,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::{debug, warn};

use super::{
    DEFAULT_MAX_FRAME_SIZE, ProtocolTransport, QueryResult, Request, Response, Value,
    handler::ConnectionLimits, transport::TransportError,
};

/// Client side of one connection to a [`QueryServer`](super::QueryServer).
///
/// Queries may be issued from several threads; they are serialized so each
/// request is paired with its own response. Any transport failure closes the
/// connection and every later call returns [`TransportError::Closed`]. The
/// socket is released when the session is dropped.
pub struct Session {
    endpoint: SocketAddr,
    transport: Mutex<Option<ProtocolTransport<TcpStream>>>,
}

impl Session {
    pub fn connect(endpoint: impl ToSocketAddrs) -> Result<Self, TransportError> {
        Self::connect_with(
            endpoint,
            ConnectionLimits {
                max_frame_size: DEFAULT_MAX_FRAME_SIZE,
                io_timeout: None,
            },
        )
    }

    pub fn connect_with(
        endpoint: impl ToSocketAddrs,
        limits: ConnectionLimits,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(endpoint)?;
        stream.set_read_timeout(limits.io_timeout)?;
        stream.set_write_timeout(limits.io_timeout)?;
        let endpoint = stream.peer_addr()?;
        debug!("connected to {endpoint}");

        Ok(Self {
            endpoint,
            transport: Mutex::new(Some(ProtocolTransport::with_max_frame_size(
                stream,
                limits.max_frame_size,
            ))),
        })
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Sends one statement and waits for its result. An error-tagged result
    /// from the server is returned as `Ok`.
    pub fn query(&self, sql: &str) -> Result<QueryResult, TransportError> {
        self.query_with_params(sql, &[])
    }

    pub fn query_with_params(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, TransportError> {
        let req = Request::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        match self.exchange(&req)? {
            Response::Result(result) => Ok(result),
            other => Err(TransportError::Unexpected(format!("{other:?}"))),
        }
    }

    pub fn ping(&self) -> Result<(), TransportError> {
        match self.exchange(&Request::Ping)? {
            Response::Pong => Ok(()),
            Response::Result(result) if result.is_err() => {
                Err(TransportError::Unexpected(result.to_string()))
            }
            other => Err(TransportError::Unexpected(format!("{other:?}"))),
        }
    }

    /// Ends the session politely and closes the connection.
    pub fn close(self) -> Result<(), TransportError> {
        let Some(mut transport) = self.lock().take() else {
            return Ok(());
        };

        transport.write_request(&Request::CloseConnection)?;
        let resp = transport.read_response();
        let stream = transport.into_inner();
        if let Err(e) = stream.shutdown(Shutdown::Both) {
            debug!("shutdown of {} failed: {e}", self.endpoint);
        }

        match resp? {
            Response::ConnectionClosed => Ok(()),
            other => Err(TransportError::Unexpected(format!("{other:?}"))),
        }
    }

    fn exchange(&self, req: &Request) -> Result<Response, TransportError> {
        let mut guard = self.lock();
        let transport = guard.as_mut().ok_or(TransportError::Closed)?;

        if let Err(e) = transport.write_request(req) {
            // Refused before any byte reached the socket; the connection is intact.
            if !matches!(e, TransportError::Frame(_) | TransportError::Serialize(_)) {
                warn!("closing session to {}: {e}", self.endpoint);
                guard.take();
            }
            return Err(e);
        }

        let resp = transport.read_response();
        if let Err(e) = &resp {
            warn!("closing session to {}: {e}", self.endpoint);
            guard.take();
        }
        resp
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProtocolTransport<TcpStream>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Session(host='{}', port={})",
            self.endpoint.ip(),
            self.endpoint.port()
        )
    }
}
