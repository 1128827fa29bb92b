//! CLI utilities for Ferry.
//!
//! The utilities present in this module are used by the interactive client to
//! turn user input into something a [`Session`](crate::Session) can send.
use std::io::{self, BufRead, Write};

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`, or end of input
    Exit,
    /// Health probe `.ping`
    Ping,
    /// Query text forwarded to the server as-is
    Statement(String),
}

/// Prompt user for a command.
///
/// Blank lines are returned as an empty statement so the caller can skip
/// them; reaching end of input is treated as `.exit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, String>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ").map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())?;

    let read = reader
        .read_line(&mut s)
        .map_err(|e: io::Error| e.to_string())?;
    if read == 0 {
        return Ok(Command::Exit);
    }

    match s.trim() {
        ".exit" => Ok(Command::Exit),
        ".ping" => Ok(Command::Ping),
        s if !s.starts_with('.') => Ok(Command::Statement(s.to_string())),
        s => Err(format!("unrecognized command '{}'", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_statements() {
        let input = b"SELECT * FROM co2 LIMIT 0,10;\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(
            Command::Statement("SELECT * FROM co2 LIMIT 0,10;".to_string()),
            res
        );
    }

    #[test]
    fn prompt_handles_blank_line() {
        let input = b"\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Statement(String::default()), res);
    }

    #[test]
    fn prompt_end_of_input_exits() {
        let input = b"";
        let mut output = Vec::new();

        assert_eq!(Command::Exit, prompt(&input[..], &mut output).unwrap());
    }

    #[test]
    fn prompt_ping() {
        let input = b".ping\n";
        let mut output = Vec::new();

        assert_eq!(Command::Ping, prompt(&input[..], &mut output).unwrap());
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }
}
