//! Client-server communication protocol.
//!
//! This module defines how Ferry clients and servers talk to each other: the
//! message types, the framing that delimits them on a TCP stream, the
//! connection handler and listener on the server side, and the [`Session`]
//! used by callers.
//!
//! # Binary Format
//!
//! Every message is one frame:
//!
//! - a 4-byte big-endian unsigned length,
//! - followed by exactly that many bytes of payload.
//!
//! Payloads are [`Request`] and [`Response`] values encoded with bincode
//! (big-endian, fixed-width integers). A receiver never reads a payload whose
//! declared length exceeds its configured maximum; it answers with a `Frame`
//! error instead when it still can.
//!
//! # Exchanges
//!
//! A connection carries any number of request/response exchanges, strictly
//! alternating. The server answers every `Query` with a [`QueryResult`], which
//! is either the rows, a change count, or an error tag with a message. The
//! connection ends when the client sends `CloseConnection`, hangs up, or stays
//! silent past the server's I/O timeout.
//!
//! # Concurrency
//!
//! Each accepted connection is handled on a pool worker. Handlers share only
//! the database path; every statement runs on its own backend handle. No
//! ordering is promised between statements from different connections beyond
//! what SQLite's locking provides. When every worker is busy and the queue is
//! full, new connections receive a single `Busy` error and are closed.
//!
//! # See Also
//!
//! - [`executor`](crate::executor): runs the statements a handler receives.
mod client;
mod handler;
mod request;
mod response;
mod server;
mod thread;
mod transport;
mod value;

use thread::ThreadPool;

pub use client::Session;
pub use handler::{ConnectionLimits, Deadline, handle_connection, serve_connection};
pub use request::Request;
pub use response::{ErrorCode, QueryResult, Response, Row};
pub use server::{QueryServer, ServerError, ShutdownHandle, serve};
pub use transport::{DEFAULT_MAX_FRAME_SIZE, FrameError, ProtocolTransport, TransportError};
pub use value::Value;
