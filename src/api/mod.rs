//! Blocking HTTP/1.1 front-end for the detection pipeline.
//!
//! One accept thread serves one connection at a time, so at most one
//! inference runs per server. Every response closes the connection.
//!
//! Routes:
//! - `GET /health`
//! - `POST /` summary of the best detection over all classes
//! - `POST /upload/`, `POST /camera/` detailed listing of the person class
//! - `POST /detect?mode=summary|detailed&classes=0,car` general form

pub mod multipart;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

use crate::detect::{parse_class_filter, ClassFilter, DetectionAdapter};
use crate::error::DetectError;
use crate::run_pipeline;
use crate::select::SelectMode;

const MAX_HEADER_BYTES: usize = 16 * 1024;
const MAX_DISCARD_BYTES: usize = 1024 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const IMAGE_FIELD: &str = "image";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    pub person_class_id: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            person_class_id: 0,
        }
    }
}

impl From<&crate::config::DetectApiConfig> for ApiConfig {
    fn from(cfg: &crate::config::DetectApiConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            max_upload_bytes: cfg.max_upload_bytes,
            person_class_id: cfg.person_class_id,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    adapter: Arc<DetectionAdapter>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, adapter: Arc<DetectionAdapter>) -> Self {
        Self { cfg, adapter }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let adapter = self.adapter;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, &adapter, shutdown_thread) {
                log::error!("detection api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    adapter: &DetectionAdapter,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = handle_connection(stream, cfg, adapter) {
                    log::warn!("request from {} failed: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Status code plus JSON body.
#[derive(Debug)]
struct Reply {
    status: u16,
    body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: &impl serde::Serialize) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(err) => Self::error(500, "internal_error", &err.to_string()),
        }
    }

    fn error(status: u16, kind: &str, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message, "kind": kind }).to_string().into_bytes(),
        }
    }

    fn from_detect_error(err: &DetectError) -> Self {
        Self::error(err.status_code(), err.kind(), &err.to_string())
    }
}

#[derive(Debug, Error)]
enum RequestError {
    #[error("request body of {declared} bytes exceeds the {limit} byte limit")]
    TooLarge { declared: usize, limit: usize },
    #[error("content-length required")]
    LengthRequired,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    adapter: &DetectionAdapter,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = match read_request(&mut stream, cfg.max_upload_bytes) {
        Ok(request) => request,
        Err(RequestError::Io(err)) => return Err(err.into()),
        Err(err) => {
            let reply = match &err {
                RequestError::TooLarge { .. } => {
                    Reply::error(413, "payload_too_large", &err.to_string())
                }
                RequestError::LengthRequired => {
                    Reply::error(411, "length_required", &err.to_string())
                }
                _ => Reply::error(400, "bad_request", &err.to_string()),
            };
            log::warn!("request rejected: {}", err);
            write_reply(&mut stream, &reply)?;
            discard_remaining(&mut stream);
            return Ok(());
        }
    };

    let reply = route(&request, cfg, adapter);
    log::info!("{} {} -> {}", request.method, request.path, reply.status);
    write_reply(&mut stream, &reply)?;
    Ok(())
}

fn route(request: &HttpRequest, cfg: &ApiConfig, adapter: &DetectionAdapter) -> Reply {
    let allowed = match request.path.as_str() {
        "/health" => "GET",
        "/" | "/upload" | "/camera" | "/detect" => "POST",
        _ => return Reply::error(404, "not_found", "no such route"),
    };
    if request.method != allowed {
        return Reply::error(
            405,
            "method_not_allowed",
            &format!("{} only accepts {}", request.path, allowed),
        );
    }

    match request.path.as_str() {
        "/health" => Reply::json(
            200,
            &json!({ "status": "ok", "backend": adapter.backend_name() }),
        ),
        "/" => detect_reply(request, adapter, SelectMode::Summary, None),
        "/upload" | "/camera" => {
            let person_only = ClassFilter::from([cfg.person_class_id]);
            detect_reply(request, adapter, SelectMode::Detailed, Some(&person_only))
        }
        _ => match detect_options(request, adapter) {
            Ok((mode, filter)) => detect_reply(request, adapter, mode, filter.as_ref()),
            Err(err) => Reply::error(400, "bad_request", &format!("{:#}", err)),
        },
    }
}

fn detect_options(
    request: &HttpRequest,
    adapter: &DetectionAdapter,
) -> Result<(SelectMode, Option<ClassFilter>)> {
    let mode = match request.query.get("mode") {
        Some(mode) => mode.parse()?,
        None => SelectMode::default(),
    };
    let filter = match request.query.get("classes") {
        Some(classes) => Some(parse_class_filter(classes, adapter.labels())?),
        None => None,
    };
    Ok((mode, filter))
}

fn detect_reply(
    request: &HttpRequest,
    adapter: &DetectionAdapter,
    mode: SelectMode,
    filter: Option<&ClassFilter>,
) -> Reply {
    let Some(boundary) = request
        .header("content-type")
        .and_then(multipart::boundary)
    else {
        return Reply::from_detect_error(&DetectError::InputMissing);
    };
    let image = match multipart::read_field(request.body.clone(), &boundary, IMAGE_FIELD) {
        Ok(image) => image.unwrap_or_default(),
        Err(err) => return Reply::error(400, "bad_request", &format!("{:#}", err)),
    };

    match run_pipeline(&image, adapter, mode, filter) {
        Ok(result) => {
            log::info!("{} qualifying detections", result.count());
            Reply::json(200, &result)
        }
        Err(err) => {
            if err.status_code() >= 500 {
                log::error!("detection failed: {}", err);
            }
            Reply::from_detect_error(&err)
        }
    }
}

fn read_request(stream: &mut TcpStream, max_body: usize) -> Result<HttpRequest, RequestError> {
    let mut buf = [0u8; 8192];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(idx) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break idx;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(RequestError::Malformed("headers too large".to_string()));
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("connection closed before headers".to_string()));
        }
        data.extend_from_slice(&buf[..n]);
    };

    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| RequestError::Malformed("empty request".to_string()))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing method".to_string()))?;
    let raw_path = parts
        .next()
        .ok_or_else(|| RequestError::Malformed("missing path".to_string()))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)?),
        None => (raw_path, HashMap::new()),
    };

    let mut body = data.split_off(header_end + 4);
    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| RequestError::Malformed("invalid content-length".to_string()))?,
        None if method == "POST" => return Err(RequestError::LengthRequired),
        None => 0,
    };
    if content_length > max_body {
        return Err(RequestError::TooLarge {
            declared: content_length,
            limit: max_body,
        });
    }
    let expects_continue = headers
        .get("expect")
        .is_some_and(|value| value.eq_ignore_ascii_case("100-continue"));
    if expects_continue && body.len() < content_length {
        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
        stream.flush()?;
    }
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(RequestError::Malformed("body shorter than content-length".to_string()));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    Ok(HttpRequest {
        method: method.to_string(),
        path: normalize_path(path),
        query,
        headers,
        body: Bytes::from(body),
    })
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_query(query: &str) -> Result<HashMap<String, String>, RequestError> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |raw: &str| {
            urlencoding::decode(&raw.replace('+', " "))
                .map(|value| value.into_owned())
                .map_err(|_| RequestError::Malformed(format!("invalid query encoding: {}", raw)))
        };
        params.insert(decode(key)?, decode(value)?);
    }
    Ok(params)
}

fn write_reply(stream: &mut TcpStream, reply: &Reply) -> Result<()> {
    let status_line = match reply.status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        len = reply.body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&reply.body)?;
    stream.flush()?;
    Ok(())
}

/// Read and drop whatever the client is still sending so closing the socket
/// does not reset the connection before the reply is read.
fn discard_remaining(stream: &mut TcpStream) {
    let _ = stream.shutdown(Shutdown::Write);
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
    let mut buf = [0u8; 8192];
    let mut total = 0;
    while total < MAX_DISCARD_BYTES {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n,
        }
    }
}
