//! Classifier for transcoder output lines.
//!
//! Every line captured from the transcoder's stdout or stderr is reduced to an
//! [`OutputEvent`] which the job's monitor feeds into its state machine. The
//! transcoder runs with `-loglevel level`, so severity appears as a bracketed
//! tag either at the start of the line or after a `[component @ addr]` prefix.

/// Classified transcoder output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The muxer opened this job's playlist for writing: the stream is ready.
    Opened,
    /// Line-leading `[error]`; non-fatal warning from the transcoder.
    Error(String),
    /// Line-leading `[fatal]` or `[panic]`; aborts startup.
    Fatal(String),
    /// `[error]` after a component prefix.
    InnerError(String),
    /// `[fatal]` or `[panic]` after a component prefix; aborts startup.
    InnerFatal(String),
    /// Anything else.
    Other,
}

impl OutputEvent {
    /// Whether this event fails a pending readiness wait.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OutputEvent::Fatal(_) | OutputEvent::InnerFatal(_))
    }
}

const FATAL_TAGS: &[&str] = &["[fatal] ", "[panic] "];
const ERROR_TAG: &str = "[error] ";

/// Path the muxer announces while writing the first playlist revision.
pub fn readiness_path(output_path: &str) -> String {
    format!("{}.tmp", output_path)
}

/// Classifies one output line.
///
/// `expected_path` is the temporary playlist path from [`readiness_path`].
/// Classification order:
/// 1. `[hls @ <addr>] Opening '<expected_path>' for writing` -> Opened
/// 2. leading `[error]` -> Error
/// 3. leading `[fatal]` / `[panic]` -> Fatal
/// 4. inner ` [error] ` -> InnerError
/// 5. inner ` [fatal] ` / ` [panic] ` -> InnerFatal
pub fn classify_line(line: &str, expected_path: &str) -> OutputEvent {
    if opened_path(line).is_some_and(|path| same_path(path, expected_path)) {
        return OutputEvent::Opened;
    }

    if let Some(message) = line.strip_prefix(ERROR_TAG) {
        return OutputEvent::Error(message.to_string());
    }

    for tag in FATAL_TAGS {
        if let Some(message) = line.strip_prefix(tag) {
            return OutputEvent::Fatal(message.to_string());
        }
    }

    if let Some(message) = inner_message(line, ERROR_TAG) {
        return OutputEvent::InnerError(message);
    }

    for tag in FATAL_TAGS {
        if let Some(message) = inner_message(line, tag) {
            return OutputEvent::InnerFatal(message);
        }
    }

    OutputEvent::Other
}

/// Extracts the quoted path from an `[hls @ ...] Opening '...' for writing` line.
fn opened_path(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("[hls @ ")?;
    let (_, rest) = rest.split_once("] ")?;
    // `-loglevel level` inserts the severity between prefix and message
    let rest = rest.strip_prefix("[info] ").unwrap_or(rest);
    let rest = rest.strip_prefix("Opening '")?;
    rest.strip_suffix("' for writing")
}

fn same_path(found: &str, expected: &str) -> bool {
    found == expected || found.replace('\\', "/") == expected.replace('\\', "/")
}

fn inner_message(line: &str, tag: &str) -> Option<String> {
    let needle = format!(" {}", tag);
    line.find(&needle)
        .map(|i| line[i + needle.len()..].to_string())
}
