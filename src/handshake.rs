use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::errors::WsError;

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// header collection with case-insensitive names
///
/// Lookup folds names to ascii lowercase; iteration yields the name as
/// first inserted so the wire keeps its canonical casing.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: HashMap<String, (String, String)>,
}

impl Headers {
    /// empty header set
    pub fn new() -> Self {
        Default::default()
    }

    /// insert or replace a header
    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        self.entries
            .insert(name.to_ascii_lowercase(), (name, value.into()));
    }

    /// look up a header value, any casing
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    /// check presence, any casing
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// remove a header, any casing
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries
            .remove(&name.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// iterate (name, value) pairs with original casing
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.values().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// check emptiness
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// parsed http/1.1 request head plus body
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// request method, `GET` for upgrades
    pub method: String,
    /// request target
    pub path: String,
    /// http version, `1.1`
    pub version: String,
    /// request headers
    pub headers: Headers,
    /// request body, empty for upgrades
    pub body: String,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            path: "/".to_string(),
            version: "1.1".to_string(),
            headers: Headers::new(),
            body: String::new(),
        }
    }
}

/// parsed http/1.1 response head plus body
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// status code
    pub status_code: u16,
    /// reason phrase
    pub status_message: String,
    /// http version, `1.1`
    pub version: String,
    /// response headers
    pub headers: Headers,
    /// response body
    pub body: String,
}

impl Default for HandshakeResponse {
    fn default() -> Self {
        Self {
            status_code: 200,
            status_message: String::new(),
            version: "1.1".to_string(),
            headers: Headers::new(),
            body: String::new(),
        }
    }
}

impl HandshakeResponse {
    /// response with a status code and its canonical reason phrase
    pub fn with_status(status_code: u16) -> Self {
        Self {
            status_code,
            status_message: reason_phrase(status_code).to_string(),
            ..Default::default()
        }
    }
}

/// canonical reason phrase for a status code
pub fn reason_phrase(status_code: u16) -> &'static str {
    http::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("Unknown")
}

/// generate a random `Sec-WebSocket-Key` nonce
pub fn gen_key() -> String {
    let nonce: [u8; 16] = rand::random();
    BASE64.encode(nonce)
}

/// compute `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(GUID);
    BASE64.encode(sha1.finalize())
}

/// build the upgrade request for `path` against `host:port`
pub fn upgrade_request(
    path: &str,
    key: &str,
    sub_protocols: &[String],
    extra_headers: &Headers,
) -> HandshakeRequest {
    let mut request = HandshakeRequest {
        path: path.to_string(),
        ..Default::default()
    };
    for (name, value) in extra_headers.iter() {
        request.headers.insert(name, value);
    }
    request.headers.insert("Upgrade", "websocket");
    request.headers.insert("Connection", "Upgrade");
    request.headers.insert("Sec-WebSocket-Key", key);
    request.headers.insert("Sec-WebSocket-Version", "13");
    if !sub_protocols.is_empty() {
        request
            .headers
            .insert("Sec-WebSocket-Protocol", sub_protocols.join(", "));
    }
    request
}

/// serialize a request per the http/1.1 wire shape
///
/// The `Host` line follows the request line; the port is omitted on the
/// default ports 80 and 443. `Content-Length` is added when a body is
/// present and not already declared (any casing).
pub fn encode_request(request: &HandshakeRequest, host: &str, port: u16) -> String {
    let mut out = format!(
        "{} {} HTTP/{}\r\n",
        request.method, request.path, request.version
    );
    if port == 80 || port == 443 {
        out.push_str(&format!("Host: {host}\r\n"));
    } else {
        out.push_str(&format!("Host: {host}:{port}\r\n"));
    }
    for (name, value) in request.headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !request.body.is_empty() && !request.headers.contains("Content-Length") {
        out.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
    }
    out.push_str("\r\n");
    out.push_str(&request.body);
    out
}

/// serialize a response, status line first
pub fn encode_response(response: &HandshakeResponse) -> String {
    let message = if response.status_message.is_empty() {
        reason_phrase(response.status_code)
    } else {
        response.status_message.as_str()
    };
    let mut out = format!(
        "HTTP/{} {} {}\r\n",
        response.version, response.status_code, message
    );
    for (name, value) in response.headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !response.body.is_empty() && !response.headers.contains("Content-Length") {
        out.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);
    out
}

/// parse a complete request head
pub fn parse_request(head: &[u8]) -> Result<HandshakeRequest, WsError> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut header_storage);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(WsError::HandshakeFailed("incomplete request".to_string()))
        }
        Err(e) => return Err(WsError::HandshakeFailed(format!("invalid request: {e}"))),
    }
    let mut request = HandshakeRequest {
        method: parsed.method.unwrap_or_default().to_string(),
        path: parsed.path.unwrap_or("/").to_string(),
        version: match parsed.version {
            Some(0) => "1.0".to_string(),
            _ => "1.1".to_string(),
        },
        ..Default::default()
    };
    for header in parsed.headers.iter() {
        request.headers.insert(
            header.name,
            String::from_utf8_lossy(header.value).trim().to_string(),
        );
    }
    Ok(request)
}

/// parse a complete response head
pub fn parse_response(head: &[u8]) -> Result<HandshakeResponse, WsError> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut header_storage);
    match parsed.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(WsError::HandshakeFailed("incomplete response".to_string()))
        }
        Err(e) => return Err(WsError::HandshakeFailed(format!("invalid response: {e}"))),
    }
    let mut response = HandshakeResponse {
        status_code: parsed.code.unwrap_or_default(),
        status_message: parsed.reason.unwrap_or_default().to_string(),
        version: match parsed.version {
            Some(0) => "1.0".to_string(),
            _ => "1.1".to_string(),
        },
        ..Default::default()
    };
    for header in parsed.headers.iter() {
        response.headers.insert(
            header.name,
            String::from_utf8_lossy(header.value).trim().to_string(),
        );
    }
    Ok(response)
}

fn header_equals(headers: &Headers, name: &str, expected: &str) -> bool {
    headers
        .get(name)
        .map(|value| value.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// server-side upgrade validation
///
/// On success returns the client's `Sec-WebSocket-Key`; on failure the
/// diagnostic body for the 400 response.
pub fn validate_request(request: &HandshakeRequest) -> Result<String, String> {
    if !request.headers.contains("Connection") {
        return Err("\"Connection\" header not found".to_string());
    }
    if !header_equals(&request.headers, "Connection", "Upgrade") {
        return Err("\"Connection\" header value is not \"Upgrade\"".to_string());
    }
    if !request.headers.contains("Upgrade") {
        return Err("\"Upgrade\" header not found".to_string());
    }
    if !header_equals(&request.headers, "Upgrade", "websocket") {
        return Err("\"Upgrade\" header value is not \"websocket\"".to_string());
    }
    let key = match request.headers.get("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => key.to_string(),
        _ => return Err("\"Sec-WebSocket-Key\" header not found".to_string()),
    };
    match request.headers.get("Sec-WebSocket-Version") {
        None => return Err("\"Sec-WebSocket-Version\" header not found".to_string()),
        Some("13") => {}
        Some(_) => return Err("Invalid \"Sec-WebSocket-Version\" header value".to_string()),
    }
    Ok(key)
}

/// build the 101 response answering a validated request key
pub fn upgrade_response(key: &str) -> HandshakeResponse {
    let mut response = HandshakeResponse::with_status(101);
    response.headers.insert("Upgrade", "websocket");
    response.headers.insert("Connection", "Upgrade");
    response
        .headers
        .insert("Sec-WebSocket-Accept", accept_key(key));
    response
}

/// client-side validation of the server's 101 response
pub fn validate_response(response: &HandshakeResponse, sent_key: &str) -> Result<(), String> {
    if response.status_code != 101 {
        return Err(format!(
            "expect 101 response, got {} {}",
            response.status_code, response.status_message
        ));
    }
    if !header_equals(&response.headers, "Connection", "Upgrade") {
        return Err("\"Connection\" header value is not \"Upgrade\"".to_string());
    }
    if !header_equals(&response.headers, "Upgrade", "websocket") {
        return Err("\"Upgrade\" header value is not \"websocket\"".to_string());
    }
    match response.headers.get("Sec-WebSocket-Accept") {
        None => Err("Sec-WebSocket-Accept header not found".to_string()),
        Some(got) if got == accept_key(sent_key) => Ok(()),
        Some(got) => Err(format!(
            "mismatch accept key, expect {}, got {got}",
            accept_key(sent_key)
        )),
    }
}
