use std::io::{self, ErrorKind, Read, Write};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
    decode_from_slice, encode_to_vec,
};
use log::trace;
use thiserror::Error;

use super::{Request, Response};

/// Largest payload accepted by default, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1024 * 1024;

const HEADER_SIZE: usize = size_of::<u32>();

/// Upper bound on memory bincode may claim while decoding a single payload.
const DECODE_LIMIT: usize = 64 * 1024 * 1024;

type WireConfig = Configuration<BigEndian, Fixint, Limit<DECODE_LIMIT>>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: u64, max: u32 },
    #[error("malformed frame payload: {0}")]
    Malformed(#[source] bincode::error::DecodeError),
    #[error("{0} trailing bytes after frame payload")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// Length-prefixed message transport.
///
/// Every message travels as one frame: a big-endian `u32` byte count followed
/// by exactly that many bytes of bincode payload. Frames whose declared size
/// exceeds `max_frame_size` are refused in both directions; on the read side
/// the payload is never buffered.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    config: WireConfig,
    max_frame_size: u32,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(stream: T, max_frame_size: u32) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding()
            .with_limit::<DECODE_LIMIT>();
        Self {
            stream,
            config,
            max_frame_size,
        }
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    pub fn write_request(&mut self, req: &Request) -> Result<(), TransportError> {
        self.write_message(req)
    }

    pub fn write_response(&mut self, resp: &Response) -> Result<(), TransportError> {
        self.write_message(resp)
    }

    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        self.read_message()
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        self.read_message()
    }

    fn write_message<M: Encode>(&mut self, message: &M) -> Result<(), TransportError> {
        let payload = encode_to_vec(message, self.config)?;
        self.write_frame(&payload)
    }

    fn read_message<M: Decode<()>>(&mut self) -> Result<M, TransportError> {
        let payload = self.read_frame()?;
        let (message, read) =
            decode_from_slice(&payload, self.config).map_err(FrameError::Malformed)?;
        if read != payload.len() {
            return Err(FrameError::TrailingBytes(payload.len() - read).into());
        }
        Ok(message)
    }

    /// Writes one frame. Nothing is written if the payload is oversized.
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let size = payload.len() as u64;
        if size > u64::from(self.max_frame_size) {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            }
            .into());
        }

        let header = (payload.len() as u32).to_be_bytes();
        self.stream.write_all(&header)?;
        self.stream.write_all(payload)?;
        self.stream.flush()?;
        trace!("wrote frame of {size} bytes");
        Ok(())
    }

    /// Reads one complete frame.
    ///
    /// End of stream before the first header byte is reported as
    /// [`TransportError::Closed`]; end of stream anywhere later is an I/O error.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.stream.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Err(TransportError::Closed),
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed inside frame header",
                    )
                    .into());
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let size = u32::from_be_bytes(header);
        if size > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: u64::from(size),
                max: self.max_frame_size,
            }
            .into());
        }

        let mut payload = vec![0u8; size as usize];
        self.stream.read_exact(&mut payload)?;
        trace!("read frame of {size} bytes");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek};

    use crate::protocol::{QueryResult, Value};

    use super::*;

    /// Hands out at most `chunk` bytes per read and per write.
    struct Trickle {
        inner: Cursor<Vec<u8>>,
        chunk: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.chunk);
            self.inner.read(&mut buf[..len])
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let len = buf.len().min(self.chunk);
            self.inner.write(&buf[..len])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_write_request() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport.write_request(&Request::CloseConnection).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();
        let req = transport.read_request().unwrap();
        assert_eq!(req, Request::CloseConnection);
    }

    #[test]
    fn read_write_response() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport.write_response(&Response::Pong).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();
        let resp = transport.read_response().unwrap();
        assert_eq!(resp, Response::Pong);
    }

    #[test]
    fn frame_starts_with_big_endian_length() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));

        transport.write_frame(b"hello").unwrap();
        let bytes = transport.into_inner().into_inner();
        assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[4..], b"hello");
    }

    #[test]
    fn partial_reads_and_writes_assemble_full_frame() {
        let stream = Trickle {
            inner: Cursor::new(Vec::new()),
            chunk: 3,
        };
        let mut transport = ProtocolTransport::new(stream);
        let rows = (0..200)
            .map(|i| vec![Value::Integer(i), Value::Text(format!("row {i}"))])
            .collect();
        let resp = Response::Result(QueryResult::Rows {
            columns: vec!["id".into(), "name".into()],
            rows,
        });

        transport.write_response(&resp).unwrap();
        transport.stream.inner.set_position(0);
        assert_eq!(transport.read_response().unwrap(), resp);
    }

    #[test]
    fn messages_are_read_back_in_order() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));

        transport.write_request(&Request::query("SELECT 1")).unwrap();
        transport.write_request(&Request::Ping).unwrap();
        transport.stream.set_position(0);

        assert_eq!(transport.read_request().unwrap(), Request::query("SELECT 1"));
        assert_eq!(transport.read_request().unwrap(), Request::Ping);
        assert!(matches!(
            transport.read_request(),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn oversized_header_is_rejected_without_reading_payload() {
        let mut bytes = u32::MAX.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        let mut transport = ProtocolTransport::with_max_frame_size(Cursor::new(bytes), 1024);

        let err = transport.read_frame().unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::FrameTooLarge {
                size,
                max: 1024
            }) if size == u64::from(u32::MAX)
        ));
        assert_eq!(transport.stream.position(), HEADER_SIZE as u64);
    }

    #[test]
    fn oversized_write_is_refused_before_any_byte() {
        let mut transport = ProtocolTransport::with_max_frame_size(Cursor::new(Vec::new()), 8);

        let err = transport
            .write_request(&Request::query("SELECT * FROM a_table_with_a_long_name"))
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Frame(FrameError::FrameTooLarge { max: 8, .. })
        ));
        assert!(transport.into_inner().into_inner().is_empty());
    }

    #[test]
    fn truncated_payload_is_an_io_error() {
        let mut bytes = 10u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.read_frame(),
            Err(TransportError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn truncated_header_is_an_io_error() {
        let mut transport = ProtocolTransport::new(Cursor::new(vec![0u8, 0]));

        assert!(matches!(transport.read_frame(), Err(TransportError::Io(_))));
    }

    #[test]
    fn garbage_payload_is_malformed() {
        let mut bytes = 4u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.read_request(),
            Err(TransportError::Frame(FrameError::Malformed(_)))
        ));
    }
}
