//! Byte-exact end-to-end scenarios (spec §8 S1-S6).

use std::io::Read;
use std::sync::{Arc, Mutex};

use waitress::{
    AppIterChunks, AppResponse, Application, BufferChannel, Environment, HeaderMap,
    ProgrammerError, Request, RequestError, Runnable, Settings, StartResponse, Task, TaskContext,
    Version,
};

fn context(app: impl Application + 'static) -> Arc<TaskContext<impl Application>> {
    Arc::new(TaskContext {
        settings: Arc::new(Settings::default()),
        application: Arc::new(app),
        server_name: "h".to_string(),
        effective_port: 80,
        server_trusted_proxy: false,
    })
}

fn channel() -> Arc<BufferChannel> {
    Arc::new(BufferChannel::new(
        "127.0.0.1:5000".parse().unwrap(),
        "127.0.0.1:80".parse().unwrap(),
    ))
}

fn request(version: Version, command: &str, headers: HeaderMap) -> Request {
    Request::new(version, command, "/", "", "http", headers, Box::new(std::io::empty()))
}

struct SimpleApp {
    status: &'static str,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    reported_len: Option<usize>,
}

impl Application for SimpleApp {
    fn call(
        &self,
        _environ: &Environment,
        _body: &mut dyn Read,
        start_response: &mut dyn StartResponse,
    ) -> Result<AppResponse, ProgrammerError> {
        start_response.start_response(self.status, self.headers.clone(), None)?;
        let mut iter = AppIterChunks::new(self.chunks.clone().into_iter());
        if let Some(len) = self.reported_len {
            iter = iter.with_reported_len(len);
        }
        Ok(AppResponse::Chunks(iter))
    }
}

#[test]
fn s1_get_1_0_no_keepalive_known_length() {
    let app = SimpleApp {
        status: "200 OK",
        headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
        chunks: vec![b"hi".to_vec()],
        reported_len: Some(1),
    };
    let chan = channel();
    let task = Task::new(chan.clone(), request(Version::Http10, "GET", HeaderMap::new()), context(app));
    task.service().unwrap();

    let text = String::from_utf8(chan.contents()).unwrap();
    assert!(text.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(text.contains("Content-Length: 2\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Server: waitress\r\n"));
    assert!(text.contains("Date: "));
    assert!(text.ends_with("hi"));
    assert!(task.close_on_finish());
}

#[test]
fn s2_get_1_1_unknown_length_chunks() {
    let app = SimpleApp {
        status: "200 OK",
        headers: vec![],
        chunks: vec![b"ab".to_vec(), b"cde".to_vec()],
        reported_len: None,
    };
    let chan = channel();
    let task = Task::new(chan.clone(), request(Version::Http11, "GET", HeaderMap::new()), context(app));
    task.service().unwrap();

    let text = String::from_utf8(chan.contents()).unwrap();
    assert!(text.contains("Transfer-Encoding: chunked\r\n"));
    assert!(!text.contains("Connection: close"));
    assert!(text.ends_with("2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
    assert!(!task.close_on_finish());
}

#[test]
fn s3_304_drops_body_bytes() {
    let app = SimpleApp {
        status: "304 Not Modified",
        headers: vec![],
        chunks: vec![b"ignored".to_vec()],
        reported_len: Some(1),
    };
    let chan = channel();
    let task = Task::new(chan.clone(), request(Version::Http11, "GET", HeaderMap::new()), context(app));
    task.service().unwrap();

    let text = String::from_utf8(chan.contents()).unwrap();
    assert!(text.starts_with("HTTP/1.1 304 Not Modified\r\n"));
    assert!(!text.contains("Content-Length"));
    assert!(!text.contains("ignored"));
}

#[test]
fn s4_head_with_declared_length_no_body_bytes() {
    let app = SimpleApp {
        status: "200 OK",
        headers: vec![("Content-Length".to_string(), "10".to_string())],
        chunks: vec![],
        reported_len: None,
    };
    let chan = channel();
    let task = Task::new(chan.clone(), request(Version::Http11, "HEAD", HeaderMap::new()), context(app));
    task.service().unwrap();

    let text = String::from_utf8(chan.contents()).unwrap();
    assert!(text.contains("Content-Length: 10\r\n"));
    assert!(!text.contains("Connection: close"));
    assert!(text.ends_with("\r\n\r\n"));
    assert!(!task.close_on_finish());
}

struct CapturingApp {
    captured: Arc<Mutex<Option<Environment>>>,
}

impl Application for CapturingApp {
    fn call(
        &self,
        environ: &Environment,
        _body: &mut dyn Read,
        start_response: &mut dyn StartResponse,
    ) -> Result<AppResponse, ProgrammerError> {
        *self.captured.lock().unwrap() = Some(environ.clone());
        start_response.start_response("200 OK", vec![], None)?;
        Ok(AppResponse::Chunks(AppIterChunks::new(std::iter::empty())))
    }
}

#[test]
fn s5_trusted_proxy_forwarded_header() {
    let mut headers = HeaderMap::new();
    headers.insert(
        "FORWARDED",
        r#"for="[2001:db8::1]:4711";proto=https;host=api.example:8443"#,
    );
    let captured = Arc::new(Mutex::new(None));
    let app = CapturingApp { captured: captured.clone() };

    let ctx = Arc::new(TaskContext {
        settings: Arc::new(Settings::default()),
        application: Arc::new(app),
        server_name: "h".to_string(),
        effective_port: 80,
        server_trusted_proxy: true,
    });
    let task = Task::new(channel(), request(Version::Http11, "GET", headers), ctx);
    task.service().unwrap();

    let env = captured.lock().unwrap().clone().unwrap();
    assert_eq!(env.remote_addr, "[2001:db8::1]");
    assert_eq!(env.remote_port.as_deref(), Some("4711"));
    assert_eq!(env.url_scheme, "https");
    assert_eq!(env.server_name, "api.example");
    assert_eq!(env.server_port, "8443");
    assert_eq!(env.headers.get("HTTP_HOST").map(String::as_str), Some("api.example:8443"));
}

struct NeverCalledApp;

impl Application for NeverCalledApp {
    fn call(
        &self,
        _: &Environment,
        _: &mut dyn Read,
        _: &mut dyn StartResponse,
    ) -> Result<AppResponse, ProgrammerError> {
        panic!("an error task must never invoke the application");
    }
}

#[test]
fn s6_error_task_400() {
    let req = request(Version::Http10, "GET", HeaderMap::new()).with_error(RequestError {
        code: 400,
        reason: "Bad Request".to_string(),
        body: "bad".to_string(),
    });
    let chan = channel();
    let task = Task::new(chan.clone(), req, context(NeverCalledApp));
    task.service().unwrap();

    let text = String::from_utf8(chan.contents()).unwrap();
    assert!(text.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    assert!(text.contains("Content-Type: text/plain\r\n"));
    assert!(text.contains("Connection: close\r\n"));
    assert!(text.ends_with("Bad Request\r\n\r\nbad\r\n\r\n(generated by waitress)"));
    assert!(task.close_on_finish());
}
