use std::{error, fmt, io};

/// Top-level failure type produced by the task engine.
///
/// Mirrors the error-kind split in §7 of the design: programmer contract
/// failures, proxy-header validation failures, and wire (socket) failures
/// each get their own variant so callers can match on *why* a task died
/// without string-sniffing.
#[derive(Debug)]
pub enum CoreError {
    Programmer(ProgrammerError),
    Proxy(ProxyHeaderError),
    Wire(io::Error),
    /// `defer()` failed before the task was even enqueued.
    Enqueue(String),
    /// The distinguished test-only error kind that lets a worker exit its
    /// loop deliberately. Never produced by application or proxy code.
    TestSentinel,
}

impl error::Error for CoreError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CoreError::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Programmer(e) => write!(f, "programmer error: {e}"),
            CoreError::Proxy(e) => write!(f, "proxy header error: {e}"),
            CoreError::Wire(e) => write!(f, "socket error: {e}"),
            CoreError::Enqueue(msg) => write!(f, "enqueue failed: {msg}"),
            CoreError::TestSentinel => write!(f, "test sentinel"),
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::Wire(err)
    }
}

impl From<ProgrammerError> for CoreError {
    fn from(err: ProgrammerError) -> Self {
        CoreError::Programmer(err)
    }
}

impl From<ProxyHeaderError> for CoreError {
    fn from(err: ProxyHeaderError) -> Self {
        CoreError::Proxy(err)
    }
}

/// A contract violation by the hosted application, never by a well-behaved
/// client. These are the failures §7 says "are raised to the worker and
/// logged with the task; the worker moves on."
#[derive(Debug, PartialEq, Eq)]
pub enum ProgrammerError {
    /// Body bytes were written via `Task::write` before `complete` was set.
    BodyBeforeComplete,
    /// `start_response` was called a second time without `exc_info`.
    StartResponseCalledTwice,
    /// The application returned without ever calling `start_response`.
    StartResponseNotCalled,
    /// Status line contains CR/LF or is otherwise not plain text.
    InvalidStatusLine,
    /// A header name or value contains CR/LF.
    InvalidHeaderText(String),
    /// The application attempted to supply a hop-by-hop header.
    HopByHopHeader(String),
    /// A `Content-Length` header value that doesn't parse as a non-negative integer.
    InvalidContentLength(String),
}

impl fmt::Display for ProgrammerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgrammerError::BodyBeforeComplete => {
                write!(f, "start_response was not called before body was written")
            }
            ProgrammerError::StartResponseCalledTwice => write!(
                f,
                "start_response called a second time without providing exc_info"
            ),
            ProgrammerError::StartResponseNotCalled => {
                write!(f, "application never called start_response")
            }
            ProgrammerError::InvalidStatusLine => {
                write!(f, "carriage return/line feed character present in status")
            }
            ProgrammerError::InvalidHeaderText(name) => write!(
                f,
                "carriage return/line feed character present in header {name}"
            ),
            ProgrammerError::HopByHopHeader(name) => write!(
                f,
                "{name} is a hop-by-hop header; it cannot be used by an application"
            ),
            ProgrammerError::InvalidContentLength(value) => {
                write!(f, "Content-Length value {value:?} is not a valid non-negative integer")
            }
        }
    }
}

impl error::Error for ProgrammerError {}

/// Failures surfaced while interpreting `Forwarded`/`X-Forwarded-*` headers
/// (§4.7, §7). The layer above the core turns these into a 500-class
/// `ErrorTask`.
#[derive(Debug, PartialEq, Eq)]
pub enum ProxyHeaderError {
    InvalidForwardedFor(String),
    InvalidProto(String),
}

impl fmt::Display for ProxyHeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyHeaderError::InvalidForwardedFor(raw) => {
                write!(f, "invalid Forwarded `for` parameter: {raw:?}")
            }
            ProxyHeaderError::InvalidProto(raw) => {
                write!(f, "invalid Forwarded/X-Forwarded-Proto value: {raw:?}")
            }
        }
    }
}

impl error::Error for ProxyHeaderError {}
