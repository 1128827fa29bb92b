use std::{error::Error, io, time::Duration};

use clap::Parser;
use ferry::{
    Command, Session, prompt,
    protocol::{ConnectionLimits, DEFAULT_MAX_FRAME_SIZE},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server host
    #[arg(long, default_value = "localhost")]
    host: String,
    /// Server port
    #[arg(short, long, default_value_t = 9999)]
    port: u16,
    /// Run a single query and exit
    #[arg(short, long)]
    query: Option<String>,
    /// Seconds to wait on the server before giving up, 0 to wait forever
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let limits = ConnectionLimits {
        max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        io_timeout: (cli.timeout > 0).then(|| Duration::from_secs(cli.timeout)),
    };
    let session = Session::connect_with((cli.host.as_str(), cli.port), limits)?;

    if let Some(query) = cli.query {
        println!("{}", session.query(&query)?);
        session.close()?;
        return Ok(());
    }

    println!("{session}");
    let stdin = io::stdin();
    loop {
        let cmd = match prompt(stdin.lock(), io::stdout()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Ping => match session.ping() {
                Ok(()) => println!("pong"),
                Err(e) => {
                    eprintln!("ping failed: {e}");
                    return Err(e.into());
                }
            },
            Command::Statement(sql) if sql.is_empty() => {}
            Command::Statement(sql) => match session.query(&sql) {
                Ok(result) => println!("{result}"),
                Err(e) => {
                    eprintln!("query failed: {e}");
                    return Err(e.into());
                }
            },
        }
    }

    session.close()?;
    Ok(())
}
