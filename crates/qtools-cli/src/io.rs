//! Process streams and signals for the client tools

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Cursor, Write};
use std::path::Path;

use qtools_transport::Injector;
use qtools_types::{Error, Result};
use tracing::debug;

/// Input lines: messages from the command line when any were given,
/// otherwise `path`, otherwise stdin
pub fn open_input(path: Option<&Path>, messages: &[String]) -> Result<Box<dyn BufRead + Send>> {
    if !messages.is_empty() {
        let text: String = messages.iter().map(|m| format!("{}\n", m)).collect();
        return Ok(Box::new(Cursor::new(text)));
    }

    match path {
        Some(path) => {
            let file = File::open(path).map_err(|e| open_error("Input file", path, e))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(std::io::stdin()))),
    }
}

/// `path` when given, otherwise stdout
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write + Send>> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|e| open_error("Output file", path, e))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(std::io::stdout())),
    }
}

fn open_error(what: &str, path: &Path, error: std::io::Error) -> Error {
    match error.kind() {
        std::io::ErrorKind::NotFound => {
            Error::FileNotFound(format!("{} '{}'", what, path.display()))
        }
        _ => Error::Io(error),
    }
}

/// Turn Ctrl-C into a reactor interrupt. Must be called inside a tokio
/// runtime.
pub fn forward_interrupt(injector: Injector) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            injector.interrupt();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_command_line_messages_win() {
        let mut input = open_input(Some(Path::new("/nonexistent")), &["a".into(), "b".into()]).unwrap();

        let mut text = String::new();
        input.read_to_string(&mut text).unwrap();

        assert_eq!(text, "a\nb\n");
    }

    #[test]
    fn test_input_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("input");
        std::fs::write(&path, "one\ntwo\n").unwrap();

        let input = open_input(Some(&path), &[]).unwrap();
        let lines: Vec<String> = input.lines().map(|l| l.unwrap()).collect();

        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_missing_input_file() {
        let result = open_input(Some(Path::new("/nonexistent/input")), &[]);
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_output_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output");

        {
            let mut output = open_output(Some(&path)).unwrap();
            writeln!(output, "hello").unwrap();
        }

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
