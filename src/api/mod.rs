//! HTTP surface: landing page, health probe and the WebSocket record stream.
//!
//! The listener runs on its own thread and hands each connection to a short
//! lived worker thread. Only one `/ws` stream runs at a time; it owns the
//! detection session for as long as the client stays connected.

use crate::config::ParkwatchConfig;
use crate::stream::{spawn_producer, DriverOptions, Session};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::handshake::derive_accept_key;
use tungstenite::protocol::Role;
use tungstenite::{Message, WebSocket};

const MAX_REQUEST_BYTES: usize = 8192;
const INDEX_HTML: &str = include_str!("../../assets/index.html");
const RECORD_POLL: Duration = Duration::from_millis(100);
const CLIENT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub driver: DriverOptions,
    pub channel_capacity: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            driver: DriverOptions::default(),
            channel_capacity: 1,
        }
    }
}

impl ApiConfig {
    pub fn from_config(cfg: &ParkwatchConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            driver: DriverOptions {
                pacing: cfg.stream.pacing,
                max_frames: None,
            },
            channel_capacity: cfg.stream.channel_capacity,
        }
    }
}

type SessionFactory = Box<dyn Fn() -> Result<Session> + Send + Sync>;

/// Hands the single detection session to one stream at a time.
///
/// The session opened at startup is used by the first client. A session is
/// released when its stream ends, so later clients get a freshly opened one.
struct SessionSlot {
    idle: Mutex<Option<Session>>,
    factory: SessionFactory,
    busy: AtomicBool,
}

impl SessionSlot {
    fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(SlotGuard { slot: self })
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

struct SlotGuard<'a> {
    slot: &'a SessionSlot,
}

impl SlotGuard<'_> {
    fn take_session(&self) -> Result<Session> {
        let idle = self
            .slot
            .idle
            .lock()
            .map_err(|_| anyhow!("session slot lock poisoned"))?
            .take();
        match idle {
            Some(session) => Ok(session),
            None => (self.slot.factory)(),
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::SeqCst);
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
    sessions: Arc<SessionSlot>,
}

impl ApiServer {
    /// `initial` serves the first client; `factory` opens sessions for later ones.
    pub fn new(
        cfg: ApiConfig,
        initial: Option<Session>,
        factory: impl Fn() -> Result<Session> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cfg,
            sessions: Arc::new(SessionSlot {
                idle: Mutex::new(initial),
                factory: Box::new(factory),
                busy: AtomicBool::new(false),
            }),
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let sessions = self.sessions.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, sessions, shutdown_thread) {
                log::error!("stream api stopped: {}", err);
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
    cfg: ApiConfig,
    sessions: Arc<SessionSlot>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                let cfg = cfg.clone();
                let sessions = sessions.clone();
                let shutdown = shutdown.clone();
                workers.push(std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &sessions, &shutdown) {
                        log::warn!("request from {} rejected: {}", peer, err);
                    }
                }));
                workers.retain(|worker| !worker.is_finished());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for worker in workers {
        if worker.join().is_err() {
            log::error!("connection worker panicked");
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    sessions: &SessionSlot,
    shutdown: &AtomicBool,
) -> Result<()> {
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }
    match request.path.as_str() {
        "/" => write_response(
            &mut stream,
            200,
            "text/html; charset=utf-8",
            INDEX_HTML.as_bytes(),
        ),
        "/health" => {
            let body = serde_json::json!({
                "status": "ok",
                "streaming": sessions.is_busy(),
            });
            write_response(
                &mut stream,
                200,
                "application/json",
                body.to_string().as_bytes(),
            )
        }
        "/ws" => serve_stream(stream, &request, cfg, sessions, shutdown),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn serve_stream(
    mut stream: TcpStream,
    request: &HttpRequest,
    cfg: &ApiConfig,
    sessions: &SessionSlot,
    shutdown: &AtomicBool,
) -> Result<()> {
    let Some(key) = request.websocket_key() else {
        write_json_response(&mut stream, 400, r#"{"error":"websocket_upgrade_required"}"#)?;
        return Ok(());
    };
    let Some(guard) = sessions.try_acquire() else {
        write_json_response(&mut stream, 409, r#"{"error":"stream_busy"}"#)?;
        return Ok(());
    };
    let session = match guard.take_session() {
        Ok(session) => session,
        Err(err) => {
            write_json_response(&mut stream, 503, r#"{"error":"video_unavailable"}"#)?;
            return Err(err);
        }
    };

    let accept = derive_accept_key(key.as_bytes());
    let handshake = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
    );
    stream.write_all(handshake.as_bytes())?;
    stream.set_read_timeout(None)?;
    stream.set_write_timeout(Some(CLIENT_WRITE_TIMEOUT))?;
    let peer = stream.peer_addr()?;
    let mut socket = WebSocket::from_raw_socket(stream, Role::Server, None);
    log::info!("stream client connected: {}", peer);

    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_producer(
        session,
        cfg.channel_capacity,
        cfg.driver.clone(),
        stop.clone(),
    )?;

    let mut sent = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            stop.store(true, Ordering::SeqCst);
            break;
        }
        match producer.records.recv_timeout(RECORD_POLL) {
            Ok(record) => {
                let text = serde_json::to_string(&record)?;
                if let Err(err) = socket.send(Message::text(text)) {
                    log::info!("stream client {} disconnected: {}", peer, err);
                    break;
                }
                sent += 1;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let report = producer.join()?;
    log::info!(
        "stream to {} closed after {} records ({:?}, {} source frames, {} loops)",
        peer,
        sent,
        report.reason,
        report.source.frames_read,
        report.source.loops
    );
    let _ = socket.close(None);
    let _ = socket.flush();
    Ok(())
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// `Sec-WebSocket-Key` when the request asks for a WebSocket upgrade.
    fn websocket_key(&self) -> Option<&str> {
        let upgrade = self.headers.get("upgrade")?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return None;
        }
        let connection = self.headers.get("connection")?;
        if !connection
            .split(',')
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        {
            return None;
        }
        self.headers
            .get("sec-websocket-key")
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }
}
