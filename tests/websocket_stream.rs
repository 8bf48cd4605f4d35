use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tungstenite::{Error as WsError, Message};

use parkwatch::api::{ApiConfig, ApiHandle, ApiServer};
use parkwatch::{
    open_file_source, DriverOptions, FileConfig, OccupancyDetector, OccupancyRecord, ParkingLot,
    ParkingSpace, Session, SpotGeometry,
};

fn open_session() -> Result<Session> {
    let video = FileConfig {
        path: "stub://lot".to_string(),
        width: 240,
        height: 120,
        synthetic_frames: 4,
    };
    let lot = ParkingLot::new(
        vec![ParkingSpace { x: 0, y: 0 }, ParkingSpace { x: 120, y: 60 }],
        SpotGeometry::default(),
    )?;
    Ok(Session::new(
        open_file_source(&video)?,
        OccupancyDetector::with_defaults(Arc::new(lot)),
    ))
}

struct TestApi {
    handle: Option<ApiHandle>,
}

impl TestApi {
    fn start() -> Result<Self> {
        let cfg = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            driver: DriverOptions {
                pacing: Duration::from_millis(10),
                max_frames: None,
            },
            ..ApiConfig::default()
        };
        let handle = ApiServer::new(cfg, Some(open_session()?), open_session).spawn()?;
        Ok(Self {
            handle: Some(handle),
        })
    }

    fn addr(&self) -> Result<SocketAddr> {
        self.handle
            .as_ref()
            .map(|handle| handle.addr)
            .ok_or_else(|| anyhow!("api not running"))
    }

    fn ws_url(&self) -> Result<String> {
        Ok(format!("ws://{}/ws", self.addr()?))
    }

    fn stop(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.stop(),
            None => Ok(()),
        }
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop();
        }
    }
}

fn get(addr: SocketAddr, path: &str) -> Result<(String, String)> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path)?;
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn next_record<S: Read + Write>(socket: &mut tungstenite::WebSocket<S>) -> Result<OccupancyRecord> {
    loop {
        match socket.read()? {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Close(_) => return Err(anyhow!("stream closed")),
            _ => continue,
        }
    }
}

#[test]
fn streams_records_in_frame_order() -> Result<()> {
    let api = TestApi::start()?;
    let (mut socket, response) = tungstenite::connect(api.ws_url()?)?;
    assert_eq!(response.status().as_u16(), 101);

    let records = (0..6)
        .map(|_| next_record(&mut socket))
        .collect::<Result<Vec<_>>>()?;
    let frames: Vec<u64> = records.iter().map(|r| r.frame).collect();
    assert_eq!(frames, vec![1, 2, 3, 4, 1, 2]);
    for record in &records {
        assert_eq!(record.total_spots, 2);
        assert_eq!(record.occupied + record.vacant, record.total_spots);
        assert!(!record.timestamp.is_empty());
    }

    drop(socket);
    api.stop()
}

#[test]
fn second_client_is_rejected_then_served_after_disconnect() -> Result<()> {
    let api = TestApi::start()?;
    let url = api.ws_url()?;

    let (mut first, _) = tungstenite::connect(&url)?;
    next_record(&mut first)?;

    match tungstenite::connect(&url) {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 409),
        Err(err) => return Err(err.into()),
        Ok(_) => return Err(anyhow!("second stream should be refused")),
    }

    drop(first);
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut second = loop {
        match tungstenite::connect(&url) {
            Ok((socket, _)) => break socket,
            Err(WsError::Http(_)) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => return Err(err.into()),
        }
    };

    // A fresh session starts from the first frame again.
    let record = next_record(&mut second)?;
    assert_eq!(record.frame, 1);

    drop(second);
    api.stop()
}

#[test]
fn landing_page_and_health() -> Result<()> {
    let api = TestApi::start()?;
    let addr = api.addr()?;

    let (headers, body) = get(addr, "/")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("text/html"));
    assert!(body.contains("/ws"));

    let (headers, body) = get(addr, "/health")?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    let health: serde_json::Value = serde_json::from_str(&body)?;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["streaming"], false);

    let (headers, _) = get(addr, "/ws")?;
    assert!(headers.starts_with("HTTP/1.1 400"));

    let (headers, _) = get(addr, "/events")?;
    assert!(headers.starts_with("HTTP/1.1 404"));

    api.stop()
}
