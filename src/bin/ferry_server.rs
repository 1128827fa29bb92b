use std::{error::Error, path::PathBuf, time::Duration};

use clap::Parser;
use ferry::{QueryServer, ServerConfig};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the SQLite database file to serve
    database: PathBuf,
    /// Host to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = 9999)]
    port: u16,
    /// Pending connections the listening socket may queue
    #[arg(long, default_value_t = 5)]
    backlog: i32,
    /// Connections served at the same time
    #[arg(long, default_value_t = 15)]
    workers: usize,
    /// Accepted connections that may wait for a worker before new ones are refused
    #[arg(long, default_value_t = 64)]
    queue: usize,
    /// Largest request or response payload, in bytes
    #[arg(long, default_value_t = ferry::protocol::DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: u32,
    /// Seconds allowed to read, execute and answer each request, 0 to disable
    #[arg(long, default_value_t = 30)]
    timeout: u64,
    /// Seconds to wait for in-flight connections on shutdown; waits indefinitely if unset
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        ServerConfig {
            host: cli.host,
            port: cli.port,
            database: cli.database,
            backlog: cli.backlog,
            workers: cli.workers,
            queue: cli.queue,
            max_frame_size: cli.max_frame_size,
            io_timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
            shutdown_timeout: cli.shutdown_timeout.map(Duration::from_secs),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let server = QueryServer::bind(cli.into())?;
    println!("{server}");

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received termination signal");
        shutdown.shutdown();
    })?;

    server.listen()?;
    Ok(())
}
