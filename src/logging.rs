//! Diagnostic logging.
//!
//! stdout belongs to the MCP transport, so every log line goes to stderr and,
//! optionally, a daily-rolling file.

use anyhow::Context as _;
use std::fmt;
use std::path::Path;
use tracing::field::Field;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::field::MakeExt as _;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const MAX_MESSAGE_CHARS: usize = 2000;

/// Install the global subscriber.
///
/// Returns the file writer's guard when `log_dir` is set; dropping it stops
/// the background writer, so the caller keeps it for the process lifetime.
pub fn init(debug: bool, log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .fmt_fields(field_formatter())
        .compact();

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("mcp-agents")
                .filename_suffix("log")
                .build(dir)
                .with_context(|| format!("failed to open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .fmt_fields(field_formatter())
                .compact();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_env_filter(debug))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

fn build_env_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Space-delimited fields with long messages truncated.
fn field_formatter() -> impl for<'writer> FormatFields<'writer> + Send + Sync + 'static {
    format::debug_fn(format_field).delimited(" ")
}

fn format_field(writer: &mut format::Writer<'_>, field: &Field, value: &dyn fmt::Debug) -> fmt::Result {
    if field.name() == "message" {
        let formatted = format!("{value:?}");
        let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
        write!(writer, "{truncated}")?;
        if was_truncated {
            write!(writer, "...")?;
        }
        Ok(())
    } else {
        write!(writer, "{}={value:?}", field.name())
    }
}

/// Cut `message` after `max_chars` characters. Returns the kept prefix and
/// whether anything was dropped.
pub(crate) fn truncate_for_log(message: &str, max_chars: usize) -> (&str, bool) {
    match message.char_indices().nth(max_chars) {
        Some((byte_index, _character)) => (&message[..byte_index], true),
        None => (message, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().expect("buffer lock").clone()).expect("utf8 log output")
        }
    }

    #[test]
    fn structured_fields_are_space_separated() {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .fmt_fields(field_formatter())
            .compact()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(attempt = 1, max_attempts = 2, remaining_ms = 4999, "running backend");
        });

        let output = buffer.contents();
        assert!(
            output.contains("running backend attempt=1 max_attempts=2 remaining_ms=4999"),
            "{output}"
        );
    }

    #[test]
    fn truncate_for_log_handles_multibyte_characters() {
        let (truncated, was_truncated) = truncate_for_log("abc→def", 4);
        assert!(was_truncated);
        assert_eq!(truncated, "abc→");
    }

    #[test]
    fn truncate_for_log_returns_original_when_within_limit() {
        let (truncated, was_truncated) = truncate_for_log("hello", 10);
        assert!(!was_truncated);
        assert_eq!(truncated, "hello");
    }

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let log_dir = dir.path().join("nested").join("logs");

        // The global subscriber may already be set by another test; only the
        // directory side effect is checked.
        let _ = init(false, Some(&log_dir));
        assert!(log_dir.is_dir());
    }
}
