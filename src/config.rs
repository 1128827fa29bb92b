//! Server configuration.
//!
//! [`ServerConfig`] collects the handful of externally supplied parameters the
//! listener needs: where to listen, which database file to serve, and the
//! limits that keep a burst of clients from exhausting the process.
use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use crate::protocol::{DEFAULT_MAX_FRAME_SIZE, ServerError};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path of the SQLite database file handed to every backend handle.
    pub database: PathBuf,
    /// Queued-but-unaccepted connections allowed by the listening socket.
    pub backlog: i32,
    /// Connection handlers running at the same time.
    pub workers: usize,
    /// Accepted connections waiting for a free worker before new ones are
    /// turned away as busy.
    pub queue: usize,
    pub max_frame_size: u32,
    /// Time allowed to receive one request, to execute it, and to send the
    /// reply; each phase gets the full amount. `None` disables it.
    pub io_timeout: Option<Duration>,
    /// How long to wait for in-flight handlers on shutdown. `None` waits for
    /// all of them.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
            database: PathBuf::from("ferry.db"),
            backlog: 5,
            workers: 15,
            queue: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            io_timeout: Some(Duration::from_secs(30)),
            shutdown_timeout: None,
        }
    }
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            ..Default::default()
        }
    }

    /// Resolves `host:port` to the first matching socket address.
    pub fn endpoint(&self) -> Result<SocketAddr, ServerError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ServerError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source: e,
            })?
            .next()
            .ok_or_else(|| ServerError::Resolve {
                host: self.host.clone(),
                port: self.port,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no address for host",
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_backlog() {
        let config = ServerConfig::default();

        assert_eq!(config.backlog, 5);
        assert_eq!(config.port, 9999);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn endpoint_resolves_localhost() {
        let config = ServerConfig::new("127.0.0.1", 4242, "test.db");
        let addr = config.endpoint().unwrap();

        assert_eq!(addr, "127.0.0.1:4242".parse().unwrap());
    }

    #[test]
    fn endpoint_rejects_unknown_host() {
        let config = ServerConfig::new("not a host name", 1, "test.db");

        assert!(config.endpoint().is_err());
    }
}
