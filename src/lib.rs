//! waitress - a synchronous HTTP/1.x task-processing engine
//!
//! This crate is the request-processing core of a WSGI-style server: a
//! bounded worker-thread pool ([`TaskDispatcher`]) paired with a task state
//! machine ([`Task`]) that drives a hosted [`Application`] through its
//! `start_response`/body-iteration protocol and serialises the result onto
//! a [`Channel`].
//!
//! # Protocol support
//!
//! - **HTTP/1.1**: persistent connections, chunked transfer-encoding when
//!   the application doesn't declare a length up front.
//! - **HTTP/1.0**: keep-alive only when the client asks for it and a length
//!   is known; otherwise the connection closes.
//!
//! # Scope
//!
//! Accepting TCP connections and parsing request bytes off the wire are
//! external collaborators (see [`Request`], [`Channel`]); this crate starts
//! once a [`Request`] already exists and ends once a [`Channel`] has been
//! handed the serialised response.
//!
//! # Quick start
//!
//! ```no_run
//! use waitress::{Application, AppResponse, AppIterChunks, Environment, ProgrammerError, StartResponse};
//! use std::io::Read;
//!
//! struct HelloApp;
//!
//! impl Application for HelloApp {
//!     fn call(
//!         &self,
//!         _environ: &Environment,
//!         _body: &mut dyn Read,
//!         start_response: &mut dyn StartResponse,
//!     ) -> Result<AppResponse, ProgrammerError> {
//!         start_response.start_response(
//!             "200 OK",
//!             vec![("Content-Type".to_string(), "text/plain".to_string())],
//!             None,
//!         )?;
//!         Ok(AppResponse::Chunks(AppIterChunks::new(vec![b"hello".to_vec()].into_iter())))
//!     }
//! }
//! ```
pub(crate) mod http {
    pub(crate) mod request;
    pub(crate) mod response_builder;
    pub(crate) mod types;
}
pub(crate) mod server;
pub(crate) mod errors;
pub mod settings;

pub use crate::{
    errors::{CoreError, ProgrammerError, ProxyHeaderError},
    http::{
        request::{HeaderMap, Request, RequestError},
        response_builder::{decide_policy, serialize, HeaderPair, Policy, ResponseContext},
        types::Version,
    },
    server::{
        app::{AppIterChunks, AppResponse, Application, StartResponse},
        channel::{BufferChannel, Channel, FileBuffer, TcpChannel, WritePayload},
        dispatcher::{Runnable, TaskDispatcher},
        environment::{Environment, EnvironmentBuilder},
        proxy::{ProxyHeaderResolver, ResolvedProxyHeaders},
        task::{Task, TaskContext},
    },
    settings::Settings,
};
