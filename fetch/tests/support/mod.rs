//! In-process stand-in for the dataset's identity provider, archive API and
//! object storage.
//!
//! One `TcpListener` serves all three roles on distinct path prefixes and
//! records every request so tests can assert on headers, query strings and
//! request counts. Each connection carries a single request and is closed
//! after the response.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A request as seen by the fake server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request target, including any query string.
    pub target: String,
    /// Header names (lowercased) and values, in order.
    pub headers: Vec<(String, String)>,
    /// Request body as text.
    pub body: String,
}

impl RecordedRequest {
    /// First value of header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }
}

/// What the fake API accepts and serves.
#[derive(Debug, Clone, Default)]
pub struct ApiBehaviour {
    /// Password that login accepts.
    pub password: String,
    /// Blob bodies by identifier.
    pub blobs: HashMap<String, Vec<u8>>,
    /// Identifiers the archive API refuses with 403.
    pub forbidden: HashSet<String>,
}

struct Shared {
    behaviour: ApiBehaviour,
    base: String,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Handle to a running fake API. The server lives until the process exits.
pub struct FakeDatasetApi {
    shared: Arc<Shared>,
}

impl FakeDatasetApi {
    /// Start serving `behaviour` on an ephemeral local port.
    pub fn start(behaviour: ApiBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let shared = Arc::new(Shared {
            behaviour,
            base: format!("http://127.0.0.1:{port}"),
            requests: Mutex::new(Vec::new()),
        });
        let server = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let shared = Arc::clone(&server);
                thread::spawn(move || handle(stream, &shared));
            }
        });
        Self { shared }
    }

    /// Identity provider endpoint.
    pub fn auth_endpoint(&self) -> String {
        format!("{}/auth/", self.shared.base)
    }

    /// Archive API root.
    pub fn api_base(&self) -> String {
        format!("{}/archives", self.shared.base)
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().expect("lock").clone()
    }

    /// Requests whose path starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path().starts_with(prefix))
            .collect()
    }
}

fn handle(stream: TcpStream, shared: &Shared) {
    if stream.set_read_timeout(Some(Duration::from_secs(5))).is_err() {
        return;
    }
    let Some(request) = read_request(&stream) else {
        return;
    };
    shared
        .requests
        .lock()
        .expect("lock")
        .push(request.clone());
    let (status, content_type, body) = route(&request, shared);
    respond(stream, status, content_type, &body);
}

fn read_request(stream: &TcpStream) -> Option<RecordedRequest> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_owned();
    let target = parts.next()?.to_owned();

    let mut headers = Vec::new();
    loop {
        let mut header = String::new();
        reader.read_line(&mut header).ok()?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_owned()));
        }
    }

    let length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).ok()?;

    Some(RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn route(request: &RecordedRequest, shared: &Shared) -> (&'static str, &'static str, Vec<u8>) {
    let path = request.path();
    if request.method == "POST" && path.starts_with("/auth") {
        return login(request, shared);
    }
    if let Some(identifier) = path.strip_prefix("/archives/") {
        return resolve(request, identifier, shared);
    }
    if let Some(identifier) = path.strip_prefix("/blobs/") {
        return shared.behaviour.blobs.get(identifier).map_or_else(
            || ("404 Not Found", "text/plain", b"no such blob".to_vec()),
            |bytes| ("200 OK", "application/octet-stream", bytes.clone()),
        );
    }
    ("404 Not Found", "text/plain", b"unknown route".to_vec())
}

fn login(request: &RecordedRequest, shared: &Shared) -> (&'static str, &'static str, Vec<u8>) {
    let expected = format!("\"PASSWORD\":\"{}\"", shared.behaviour.password);
    if !request.body.contains(&expected) {
        return (
            "400 Bad Request",
            "application/x-amz-json-1.1",
            br#"{"__type":"NotAuthorizedException","message":"Incorrect username or password."}"#
                .to_vec(),
        );
    }
    let issued = shared
        .requests
        .lock()
        .expect("lock")
        .iter()
        .filter(|seen| seen.path().starts_with("/auth"))
        .count();
    let body = format!(r#"{{"AuthenticationResult":{{"IdToken":"id-token-{issued}"}}}}"#);
    ("200 OK", "application/x-amz-json-1.1", body.into_bytes())
}

fn resolve(
    request: &RecordedRequest,
    identifier: &str,
    shared: &Shared,
) -> (&'static str, &'static str, Vec<u8>) {
    let authorised = request
        .header("authorization")
        .is_some_and(|value| value.starts_with("Bearer id-token-"));
    if !authorised {
        return ("401 Unauthorized", "application/json", br#"{"message":"Unauthorized"}"#.to_vec());
    }
    if shared.behaviour.forbidden.contains(identifier) {
        return ("403 Forbidden", "application/json", br#"{"message":"Forbidden"}"#.to_vec());
    }
    if !shared.behaviour.blobs.contains_key(identifier) {
        return ("404 Not Found", "application/json", br#"{"message":"Not Found"}"#.to_vec());
    }
    let body = format!(r#"{{"url":"{}/blobs/{identifier}"}}"#, shared.base);
    ("200 OK", "application/json", body.into_bytes())
}

fn respond(mut stream: TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let written = stream
        .write_all(head.as_bytes())
        .and_then(|()| stream.write_all(body))
        .and_then(|()| stream.flush());
    if written.is_err() {
        // The client hung up; it will report the failure itself.
    }
}
