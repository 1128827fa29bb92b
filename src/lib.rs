pub mod cli;
pub mod config;
pub mod executor;
pub mod protocol;

pub use cli::{Command, prompt};
pub use config::ServerConfig;
pub use executor::{ExecutionError, QueryExecutor};
pub use protocol::{QueryResult, QueryServer, Session, ShutdownHandle, Value};
