//! Streaming of child process output into the log.

use std::io::{BufRead, BufReader, Read};

use strum::Display;

/// Which pipe a line came from.
#[derive(Clone, Copy, Display)]
#[strum(serialize_all = "lowercase")]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

/// Extracts a human-readable message from a thread panic payload.
pub(crate) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads `pipe` line by line and logs each line under `label`.
///
/// stdout goes to INFO and stderr to WARN. With `capture` set, the lines are
/// also returned joined by `\n`. Read errors stop streaming but do not fail
/// the command; its exit status decides success.
pub(super) fn stream_to_log<R: Read>(
    pipe: Option<R>,
    stream: StreamType,
    label: &str,
    capture: bool,
) -> Option<String> {
    let Some(pipe) = pipe else {
        tracing::error!(%stream, label, "pipe was not captured, no output will be logged");
        return None;
    };

    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    let mut captured = capture.then(Vec::new);
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(line.strip_suffix(b"\n").unwrap_or(&line));
                let text = text.trim_end_matches('\r');
                match stream {
                    StreamType::Stdout => tracing::info!(label, "{}", text),
                    StreamType::Stderr => tracing::warn!(label, "{}", text),
                }
                if let Some(lines) = captured.as_mut() {
                    lines.push(text.to_string());
                }
            }
            Err(e) => {
                tracing::error!(%stream, label, error = %e, "I/O error, stopping read");
                break;
            }
        }
    }
    captured.map(|lines| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_str_and_string() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_message(&*payload), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(&*payload), "owned message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(&*payload), "unknown panic");
    }

    #[test]
    fn stream_reads_until_eof() {
        let data: &[u8] = b"first\r\nsecond\nno newline";
        assert_eq!(stream_to_log(Some(data), StreamType::Stdout, "test", false), None);
        assert_eq!(stream_to_log::<&[u8]>(None, StreamType::Stderr, "test", true), None);
    }

    #[test]
    fn capture_keeps_lines_without_terminators() {
        let data: &[u8] = b"{\"ok\": true,\r\n\"host\": \"a\"}\n";
        assert_eq!(
            stream_to_log(Some(data), StreamType::Stdout, "test", true).as_deref(),
            Some("{\"ok\": true,\n\"host\": \"a\"}")
        );
    }
}
