//! Minimal HTTP/1.1 server for integration tests.
//!
//! Answers every request with the next status from a script (falling back to
//! a fixed status once the script runs out) and records what it received, so
//! tests can assert on attempt counts, ordering and idempotency keys.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub idempotency_key: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct ServerState {
    script: VecDeque<u16>,
    fallback: u16,
    requests: Vec<RecordedRequest>,
}

#[derive(Debug, Clone)]
pub struct ApiServer {
    base: String,
    state: Arc<Mutex<ServerState>>,
}

impl ApiServer {
    /// Start a server in background threads. It answers 201 until scripted
    /// otherwise and runs until the process exits.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(ServerState {
            script: VecDeque::new(),
            fallback: 201,
            requests: Vec::new(),
        }));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&shared);
                thread::spawn(move || handle(stream, &state));
            }
        });
        Self {
            base: format!("http://127.0.0.1:{}", port),
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Statuses for the next requests, in order.
    pub fn script(&self, statuses: &[u16]) {
        self.state.lock().unwrap().script.extend(statuses.iter().copied());
    }

    /// Status used once the script is exhausted.
    pub fn set_fallback(&self, status: u16) {
        self.state.lock().unwrap().fallback = status;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        400 => "Bad Request",
        401 => "Unauthorized",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

fn handle(mut stream: TcpStream, state: &Mutex<ServerState>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));

    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    let header_end = loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let (method, path, content_length, idempotency_key) = parse_head(&head);
    while raw.len() < header_end + content_length {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
        }
    }
    let body = raw[header_end..].to_vec();

    let status = {
        let mut st = state.lock().unwrap();
        st.requests.push(RecordedRequest {
            method: method.clone(),
            path,
            idempotency_key,
            body,
        });
        let fallback = st.fallback;
        st.script.pop_front().unwrap_or(fallback)
    };

    let payload = if method.eq_ignore_ascii_case("HEAD") {
        String::new()
    } else {
        format!("{{\"status\":{}}}", status)
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        payload.len(),
        payload
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Returns (method, path, content length, Idempotency-Key header).
fn parse_head(head: &str) -> (String, String, usize, Option<String>) {
    let mut lines = head.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let path = first.next().unwrap_or("").to_string();
    let mut content_length = 0;
    let mut idempotency_key = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("idempotency-key") {
            idempotency_key = Some(value.trim().to_string());
        }
    }
    (method, path, content_length, idempotency_key)
}
