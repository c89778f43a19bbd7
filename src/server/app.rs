//! The application-facing surface: the callable interface and its response
//! shape (§4.4, §6 "Application protocol", §9 design notes)

use std::io::Read;

use crate::errors::ProgrammerError;
use crate::server::channel::FileBuffer;
use crate::server::environment::Environment;

/// The `start_response(status, headers, exc_info=None)` contract (§4.4
/// step 2). A concrete implementation lives on [`crate::server::task::Task`]
/// since it needs single-owner access to the task's mutable fields (§9);
/// this trait is the seam the application code is handed.
pub trait StartResponse {
    /// Registers a status and header list. `exc_info`, when present, lets a
    /// streaming application re-open the prologue after a failure — see the
    /// contract notes in §4.4 and §9.
    fn start_response(
        &mut self,
        status: &str,
        headers: Vec<(String, String)>,
        exc_info: Option<String>,
    ) -> Result<(), ProgrammerError>;
}

/// The synchronous application callable a server hosts, conforming to the
/// gateway-style interface described in the GLOSSARY.
pub trait Application: Send + Sync {
    /// Invoked exactly once per task (§2). Receives the environment, the
    /// request body stream, and the `start_response` callback; returns the
    /// response body. `start_response` itself returns `Result`, so a
    /// well-behaved application propagates its `Err` here with `?` instead
    /// of unwrapping — that's what lets a contract violation (§7) fail only
    /// this task instead of the caller panicking.
    fn call(
        &self,
        environ: &Environment,
        body: &mut dyn Read,
        start_response: &mut dyn StartResponse,
    ) -> Result<AppResponse, ProgrammerError>;
}

/// The sum type described in §9: either a generic iterable of byte chunks
/// (with an optional close capability) or the designated file-wrapper fast
/// path.
pub enum AppResponse {
    Chunks(AppIterChunks),
    File(FileBuffer),
}

/// A generic byte-chunk iterable plus its optional `close` capability
/// (§4.4 step 7, §6).
pub struct AppIterChunks {
    chunks: Box<dyn Iterator<Item = Vec<u8>> + Send>,
    close: Option<Box<dyn FnMut() + Send>>,
    /// `Some(1)` when the iterable reports exactly one chunk of known
    /// length, enabling the §4.4 step 5 content-length synthesis.
    pub reported_len: Option<usize>,
}

impl AppIterChunks {
    pub fn new(chunks: impl Iterator<Item = Vec<u8>> + Send + 'static) -> Self {
        Self {
            chunks: Box::new(chunks),
            close: None,
            reported_len: None,
        }
    }

    pub fn with_close(mut self, close: impl FnMut() + Send + 'static) -> Self {
        self.close = Some(Box::new(close));
        self
    }

    pub fn with_reported_len(mut self, len: usize) -> Self {
        self.reported_len = Some(len);
        self
    }

    pub fn next_chunk(&mut self) -> Option<Vec<u8>> {
        self.chunks.next()
    }

    /// Invoked on every exit path if a close capability was registered
    /// (§4.4 step 7).
    pub fn close(&mut self) {
        if let Some(close) = self.close.as_mut() {
            close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn close_capability_runs_once() {
        let closed = Arc::new(AtomicBool::new(false));
        let closed2 = closed.clone();
        let mut iter = AppIterChunks::new(vec![b"a".to_vec()].into_iter())
            .with_close(move || closed2.store(true, Ordering::SeqCst));
        assert_eq!(iter.next_chunk(), Some(b"a".to_vec()));
        assert_eq!(iter.next_chunk(), None);
        iter.close();
        assert!(closed.load(Ordering::SeqCst));
    }
}
