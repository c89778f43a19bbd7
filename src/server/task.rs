//! The task state machine: start → execute → finish (§3, §4.2, §4.4, §4.5)
//!
//! Mutable per-task state (`wrote_header`, the one-shot warning latches,
//! the cached environment) lives behind a `RefCell` rather than as plain
//! fields, because [`Runnable::service`] is called through `&self` across
//! the dispatcher/worker boundary — but exactly one worker ever touches a
//! given task (§5 "Shared state"), so the `RefCell` never contends. Nothing
//! here is `Rc`; the one transient `Rc<RefCell<_>>` the WSGI
//! `start_response` contract would otherwise want is avoided by giving
//! `TaskStartResponse` a plain `&RefCell<TaskState>` borrow scoped to a
//! single `execute_wsgi` call, never stored on `Task` itself.

use std::cell::RefCell;
use std::io::Read;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{CoreError, ProgrammerError};
use crate::http::response_builder::{decide_policy, serialize, HeaderPair, ResponseContext};
use crate::http::request::{Request, RequestError};
use crate::http::types::{is_hop_by_hop, status_permits_body, validate_header_text, validate_status_line};
use crate::server::app::{AppResponse, Application, StartResponse};
use crate::server::channel::{Channel, FileBuffer, WritePayload};
use crate::server::dispatcher::Runnable;
use crate::server::environment::EnvironmentBuilder;
use crate::settings::Settings;

/// Shared, read-only context every task on a server needs (§6 "Server
/// interface consumed").
pub struct TaskContext<A: Application + 'static> {
    pub settings: Arc<Settings>,
    pub application: Arc<A>,
    pub server_name: String,
    pub effective_port: u16,
    pub server_trusted_proxy: bool,
}

/// Mutable per-task fields with their §3 defaults.
struct TaskState {
    status: String,
    wrote_header: bool,
    start_time: u64,
    content_length: Option<u64>,
    content_bytes_written: u64,
    close_on_finish: bool,
    complete: bool,
    chunked_response: bool,
    response_headers: Vec<HeaderPair>,
    logged_write_excess: bool,
    logged_write_no_body: bool,
    #[allow(dead_code)]
    logged_multi_proxy_headers: bool,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: "200 OK".to_string(),
            wrote_header: false,
            start_time: 0,
            content_length: None,
            content_bytes_written: 0,
            close_on_finish: false,
            complete: false,
            chunked_response: false,
            response_headers: Vec::new(),
            logged_write_excess: false,
            logged_write_no_body: false,
            logged_multi_proxy_headers: false,
        }
    }
}

/// A single request/response exchange being processed by a worker
/// (GLOSSARY). Generic over the channel and application types so the
/// dispatcher can hold `Box<dyn Runnable>` without an extra indirection
/// per task.
pub struct Task<C: Channel + 'static, A: Application + 'static> {
    channel: Arc<C>,
    request: RefCell<Request>,
    ctx: Arc<TaskContext<A>>,
    state: RefCell<TaskState>,
    is_error_task: bool,
}

impl<C: Channel + 'static, A: Application + 'static> Task<C, A> {
    pub fn new(channel: Arc<C>, request: Request, ctx: Arc<TaskContext<A>>) -> Self {
        let is_error_task = request.error.is_some();
        Self {
            channel,
            request: RefCell::new(request),
            ctx,
            state: RefCell::new(TaskState::default()),
            is_error_task,
        }
    }

    fn start(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.state.borrow_mut().start_time = now;
    }

    fn has_body_allowed(&self) -> bool {
        status_permits_body(&self.state.borrow().status)
    }

    /// Builds and flushes the response prologue exactly once (§4.2 step 2,
    /// §4.3).
    fn flush_prologue_if_needed(&self) -> Result<(), CoreError> {
        let already = self.state.borrow().wrote_header;
        if already {
            return Ok(());
        }

        let request = self.request.borrow();
        let version = request.version;
        let request_connection = request.headers.connection_lower();
        drop(request);

        let mut state = self.state.borrow_mut();
        let has_body = status_permits_body(&state.status);

        let bytes = if self.is_error_task {
            // §4.5: close_on_finish is forced true unconditionally, but the
            // emitted header text follows the normal per-version rule.
            let connection_value = {
                let request = self.request.borrow();
                match request.version {
                    crate::http::types::Version::Http10 => Some("close"),
                    crate::http::types::Version::Http11 => {
                        if request_connection.as_deref() == Some("close") {
                            Some("close")
                        } else {
                            None
                        }
                    }
                }
            };
            if let Some(value) = connection_value {
                state.response_headers.push(("Connection".to_string(), value.to_string()));
            }
            state.close_on_finish = true;

            serialize(
                version,
                &state.status,
                state.response_headers.clone(),
                state.content_length,
                has_body,
                &self.ctx.settings.ident,
                state.start_time,
            )
        } else {
            let ctx = ResponseContext {
                version,
                request_connection: request_connection.as_deref(),
                status: &state.status,
                content_length: state.content_length,
                has_body,
                server_ident: &self.ctx.settings.ident,
                start_time: state.start_time,
            };
            let (policy, extra_header) = decide_policy(&ctx);
            state.close_on_finish = policy.close_on_finish;
            state.chunked_response = policy.chunked_response;
            if let Some((name, value)) = extra_header {
                state.response_headers.push((name.to_string(), value.to_string()));
            }

            serialize(
                version,
                &state.status,
                state.response_headers.clone(),
                state.content_length,
                has_body,
                &self.ctx.settings.ident,
                state.start_time,
            )
        };

        state.wrote_header = true;
        drop(state);

        self.channel
            .write_soon(WritePayload::Bytes(&bytes))
            .map_err(CoreError::from)?;
        Ok(())
    }

    /// `write(data)` (§4.2): enforces `complete`, flushes the prologue on
    /// first call, then frames/truncates/drops per the body rules.
    pub fn write(&self, data: &[u8]) -> Result<(), CoreError> {
        if !self.state.borrow().complete {
            return Err(ProgrammerError::BodyBeforeComplete.into());
        }

        self.flush_prologue_if_needed()?;

        let has_body = self.has_body_allowed();
        if !has_body {
            let mut state = self.state.borrow_mut();
            state.content_bytes_written += data.len() as u64;
            if !data.is_empty() && !state.logged_write_no_body {
                state.logged_write_no_body = true;
                log::warn!(
                    target: "waitress::task",
                    "application wrote {} bytes for a status that forbids a body",
                    data.len()
                );
            }
            return Ok(());
        }

        if data.is_empty() {
            return Ok(());
        }

        let framed = {
            let mut state = self.state.borrow_mut();
            if state.chunked_response {
                state.content_bytes_written += data.len() as u64;
                frame_chunk(data)
            } else if let Some(limit) = state.content_length {
                let remaining = limit.saturating_sub(state.content_bytes_written);
                let to_write = (data.len() as u64).min(remaining) as usize;
                if (data.len() as u64) > remaining && !state.logged_write_excess {
                    state.logged_write_excess = true;
                    log::warn!(
                        target: "waitress::task",
                        "application wrote more bytes than Content-Length declared"
                    );
                }
                state.content_bytes_written += to_write as u64;
                data[..to_write].to_vec()
            } else {
                state.content_bytes_written += data.len() as u64;
                data.to_vec()
            }
        };

        if !framed.is_empty() {
            self.channel
                .write_soon(WritePayload::Bytes(&framed))
                .map_err(CoreError::from)?;
        }

        Ok(())
    }

    /// Guarantees the prologue is flushed even for a zero-byte body, and
    /// emits the chunked terminator (§4.2). Only called after `execute()`
    /// has already set `complete` by succeeding; a failed `execute()` skips
    /// this entirely rather than flushing a success-shaped response over a
    /// response the application never finished (or broke) producing.
    fn finish(&self) -> Result<(), CoreError> {
        self.write(&[])?;

        if self.state.borrow().chunked_response {
            self.channel
                .write_soon(WritePayload::Bytes(b"0\r\n\r\n"))
                .map_err(CoreError::from)?;
        }
        Ok(())
    }

    /// The current connection-lifecycle decision (§3, §4.1): whether the
    /// channel should close the underlying socket once the last byte is
    /// flushed. Meaningful only after [`Runnable::service`] returns.
    pub fn close_on_finish(&self) -> bool {
        self.state.borrow().close_on_finish
    }

    /// Terminates the task on a failure from `execute()` or `finish()`
    /// (§4.1, §7 "Failure semantics"). A wire failure forces
    /// `close_on_finish` and is only re-raised to the dispatcher when
    /// `log_socket_errors` is set; every other failure (programmer contract,
    /// proxy header, enqueue) is logged and always propagated, but never
    /// turned into a fabricated response on the wire.
    fn fail(&self, err: CoreError) -> Result<(), CoreError> {
        if matches!(err, CoreError::Wire(_)) {
            self.state.borrow_mut().close_on_finish = true;
            if !self.ctx.settings.log_socket_errors {
                return Ok(());
            }
        }
        log::error!(target: "waitress::task", "task execution failed: {err}");
        Err(err)
    }

    fn execute(&self) -> Result<(), CoreError> {
        if self.is_error_task {
            self.execute_error()
        } else {
            self.execute_wsgi()
        }
    }

    fn execute_error(&self) -> Result<(), CoreError> {
        let (code, reason, body) = {
            let request = self.request.borrow();
            let error: &RequestError = request.error.as_ref().expect("error task without error");
            (error.code, error.reason.clone(), error.body.clone())
        };

        let rendered = format!("{reason}\r\n\r\n{body}\r\n\r\n(generated by waitress)");

        {
            let mut state = self.state.borrow_mut();
            state.status = format!("{code} {reason}");
            state.content_length = Some(rendered.len() as u64);
            state
                .response_headers
                .push(("Content-Type".to_string(), "text/plain".to_string()));
            state.complete = true;
        }

        self.write(rendered.as_bytes())
    }

    fn execute_wsgi(&self) -> Result<(), CoreError> {
        let env = {
            let request = self.request.borrow();
            let builder = EnvironmentBuilder {
                settings: &self.ctx.settings,
                server_name: &self.ctx.server_name,
                effective_port: self.ctx.effective_port,
                server_trusted_proxy: self.ctx.server_trusted_proxy,
            };
            builder.build(&request, &*self.channel)
        };

        let mut start_response = TaskStartResponse { state: &self.state };

        let app_response = {
            let mut request = self.request.borrow_mut();
            let body: &mut dyn Read = request.get_body_stream();
            self.ctx.application.call(&env, body, &mut start_response)?
        };

        if !self.state.borrow().complete {
            return Err(ProgrammerError::StartResponseNotCalled.into());
        }

        match app_response {
            AppResponse::File(file) => self.execute_file(file),
            AppResponse::Chunks(mut chunks) => {
                let method_is_head = self.request.borrow().is_head();
                let mut first = true;

                while let Some(chunk) = chunks.next_chunk() {
                    if first {
                        first = false;
                        if self.state.borrow().content_length.is_none() {
                            if let Some(1) = chunks.reported_len {
                                self.state.borrow_mut().content_length = Some(chunk.len() as u64);
                            }
                        }
                    }
                    if !chunk.is_empty() {
                        self.write(&chunk)?;
                    }
                }

                let short_of_declared = {
                    let state = self.state.borrow();
                    state
                        .content_length
                        .map(|len| state.content_bytes_written < len)
                        .unwrap_or(false)
                };
                if short_of_declared && !method_is_head {
                    log::warn!(
                        target: "waitress::task",
                        "application declared a content length it did not fully write"
                    );
                    self.state.borrow_mut().close_on_finish = true;
                }

                chunks.close();
                Ok(())
            }
        }
    }

    /// File-wrapper fast path (§4.4 step 4): reconciles the declared
    /// content length, flushes the prologue, and hands the buffer straight
    /// to the channel. Ownership of the buffer transfers to the channel, so
    /// it is never closed here.
    fn execute_file(&self, file: FileBuffer) -> Result<(), CoreError> {
        {
            let mut state = self.state.borrow_mut();
            if state.content_length != Some(file.size) {
                state
                    .response_headers
                    .retain(|(name, _)| !name.eq_ignore_ascii_case("content-length"));
                state.content_length = Some(file.size);
            }
        }

        self.write(&[])?;

        if file.size > 0 {
            self.channel
                .write_soon(WritePayload::File(&file))
                .map_err(CoreError::from)?;
        }
        Ok(())
    }
}

/// Frames a chunk as `HEX(len)\r\n<data>\r\n`, uppercase hex, no leading
/// zeros (§4.2, §6).
fn frame_chunk(data: &[u8]) -> Vec<u8> {
    let header = format!("{:X}\r\n", data.len());
    let mut out = Vec::with_capacity(header.len() + data.len() + 2);
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

impl<C: Channel + 'static, A: Application + 'static> Runnable for Task<C, A> {
    fn service(&self) -> Result<(), CoreError> {
        self.start();
        match self.execute() {
            Ok(()) => match self.finish() {
                Ok(()) => Ok(()),
                Err(err) => self.fail(err),
            },
            Err(err) => self.fail(err),
        }
    }

    fn cancel(&self) {
        self.state.borrow_mut().close_on_finish = true;
    }
}

/// The `start_response` callable handed to the application (§4.4 step 2).
/// Constructed fresh for each `execute_wsgi` call and never stored on
/// `Task`; borrows `state` for the duration of that one call only.
struct TaskStartResponse<'a> {
    state: &'a RefCell<TaskState>,
}

impl<'a> StartResponse for TaskStartResponse<'a> {
    fn start_response(
        &mut self,
        status: &str,
        headers: Vec<(String, String)>,
        exc_info: Option<String>,
    ) -> Result<(), ProgrammerError> {
        let already_called = self.state.borrow().complete;
        let wrote_header = self.state.borrow().wrote_header;

        if already_called && exc_info.is_none() {
            return Err(ProgrammerError::StartResponseCalledTwice);
        }
        // Too late to change headers once the prologue already went out.
        if exc_info.is_some() && wrote_header {
            return Err(ProgrammerError::StartResponseCalledTwice);
        }
        if exc_info.is_some() {
            self.state.borrow_mut().response_headers.clear();
        }

        validate_status_line(status)?;
        let mut content_length = None;
        for (name, value) in &headers {
            validate_header_text(name, value)?;
            let lower = name.to_ascii_lowercase();
            if is_hop_by_hop(&lower) {
                return Err(ProgrammerError::HopByHopHeader(name.clone()));
            }
            if lower == "content-length" {
                content_length = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| ProgrammerError::InvalidContentLength(value.clone()))?,
                );
            }
        }

        let mut state = self.state.borrow_mut();
        state.status = status.to_string();
        if content_length.is_some() {
            state.content_length = content_length;
        }
        for (name, value) in headers {
            state.response_headers.push((name, value));
        }
        state.complete = true;

        Ok(())
    }
}
