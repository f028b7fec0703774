use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::buffered::{body_too_large, BufferedConn};
use crate::engine::WireLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    None,
    ContentLength(u64),
    Chunked,
    CloseDelimited,
}

/// A fully buffered HTTP/1.x request. The body keeps its wire framing so the
/// message can be forwarded verbatim.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    /// Destination as `host:port`, resolved from the request target or the
    /// `Host` header; rewritten by the session on kept-alive connections.
    pub host: String,
    pub scheme: Scheme,
    pub close: bool,
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|header| !header.name.eq_ignore_ascii_case(name));
    }

    pub fn is_websocket_upgrade(&self) -> bool {
        has_header_token(&self.headers, "connection", "upgrade")
            && has_header_token(&self.headers, "upgrade", "websocket")
    }

    pub fn body_mode(&self) -> io::Result<BodyMode> {
        request_body_mode(&self.headers)
    }

    /// Serializes the request for the origin, reducing an absolute-form
    /// target to origin form.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(128 + self.body.len());
        wire.extend_from_slice(self.method.as_bytes());
        wire.push(b' ');
        wire.extend_from_slice(origin_form(&self.target).as_bytes());
        wire.push(b' ');
        wire.extend_from_slice(self.version.as_str().as_bytes());
        wire.extend_from_slice(b"\r\n");
        write_headers(&mut wire, &self.headers);
        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);
        wire
    }
}

/// A fully buffered HTTP/1.x response, either read from the origin or
/// synthesized by the proxy.
#[derive(Debug, Clone)]
pub struct Response {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    pub close: bool,
}

impl Response {
    /// Synthesized HTTP/1.1 response with an empty body.
    pub fn status(status: u16) -> Response {
        Response {
            version: HttpVersion::Http11,
            status,
            reason: status_text(status).to_string(),
            headers: vec![Header {
                name: "Content-Length".to_string(),
                value: "0".to_string(),
            }],
            body: Vec::new(),
            close: false,
        }
    }

    /// The CONNECT success response. HTTP/1.0 on purpose, for broad client
    /// compatibility.
    pub fn connection_established() -> Response {
        Response {
            version: HttpVersion::Http10,
            status: 200,
            reason: "Connection established".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
            close: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Marks the response as connection-closing; the `Connection: close`
    /// header is upserted so the client learns about it.
    pub fn set_close(&mut self, close: bool) {
        self.close = close;
        if !close {
            return;
        }

        for header in &mut self.headers {
            if header.name.eq_ignore_ascii_case("connection") {
                header.value = "close".to_string();
                return;
            }
        }
        self.headers.push(Header {
            name: "Connection".to_string(),
            value: "close".to_string(),
        });
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut wire = Vec::with_capacity(128 + self.body.len());
        wire.extend_from_slice(self.version.as_str().as_bytes());
        wire.push(b' ');
        wire.extend_from_slice(self.status.to_string().as_bytes());
        if !self.reason.is_empty() {
            wire.push(b' ');
            wire.extend_from_slice(self.reason.as_bytes());
        }
        wire.extend_from_slice(b"\r\n");
        write_headers(&mut wire, &self.headers);
        wire.extend_from_slice(b"\r\n");
        wire.extend_from_slice(&self.body);
        wire
    }
}

fn write_headers(wire: &mut Vec<u8>, headers: &[Header]) {
    for header in headers {
        wire.extend_from_slice(header.name.as_bytes());
        wire.extend_from_slice(b": ");
        wire.extend_from_slice(header.value.as_bytes());
        wire.extend_from_slice(b"\r\n");
    }
}

/// Reads one request off the connection, head and body. `None` means the
/// client closed the connection cleanly between requests.
pub async fn read_request<S: AsyncRead + Unpin>(
    conn: &mut BufferedConn<S>,
    limits: &WireLimits,
) -> io::Result<Option<Request>> {
    let head = match conn
        .read_until_pattern(b"\r\n\r\n", limits.max_head_bytes)
        .await?
    {
        Some(head) => head,
        None => return Ok(None),
    };

    let mut request = parse_request_head(&head)?;
    if !request.is_connect() {
        let mode = request.body_mode()?;
        request.body = read_body(conn, mode, limits).await?;
    }
    Ok(Some(request))
}

/// Reads one response off the origin connection. The request method decides
/// whether a body is expected at all.
pub async fn read_response<S: AsyncRead + Unpin>(
    conn: &mut BufferedConn<S>,
    request_method: &str,
    limits: &WireLimits,
) -> io::Result<Response> {
    let head = conn
        .read_until_pattern(b"\r\n\r\n", limits.max_head_bytes)
        .await?
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "origin closed the connection before the response head",
            )
        })?;

    let (mut response, mode) = parse_response_head(&head, request_method)?;
    response.body = read_body(conn, mode, limits).await?;
    Ok(response)
}

async fn read_body<S: AsyncRead + Unpin>(
    conn: &mut BufferedConn<S>,
    mode: BodyMode,
    limits: &WireLimits,
) -> io::Result<Vec<u8>> {
    match mode {
        BodyMode::None => Ok(Vec::new()),
        BodyMode::ContentLength(length) => {
            if length > limits.max_body_bytes as u64 {
                return Err(body_too_large());
            }
            conn.read_exact_bytes(length as usize).await
        }
        BodyMode::Chunked => read_chunked_raw(conn, limits).await,
        BodyMode::CloseDelimited => conn.read_to_eof(limits.max_body_bytes).await,
    }
}

// Collects the raw chunked framing so the body can be forwarded verbatim.
async fn read_chunked_raw<S: AsyncRead + Unpin>(
    conn: &mut BufferedConn<S>,
    limits: &WireLimits,
) -> io::Result<Vec<u8>> {
    let mut raw = Vec::new();

    loop {
        let size_line = conn
            .read_until_pattern(b"\r\n", 256)
            .await?
            .ok_or_else(chunked_eof)?;

        let size_text = std::str::from_utf8(&size_line[..size_line.len() - 2])
            .map_err(|_| invalid_chunk_size())?;
        let size_text = size_text.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| invalid_chunk_size())?;

        raw.extend_from_slice(&size_line);
        if raw.len() + size > limits.max_body_bytes {
            return Err(body_too_large());
        }

        if size == 0 {
            // trailer section ends with a bare CRLF
            loop {
                let trailer = conn
                    .read_until_pattern(b"\r\n", limits.max_head_bytes)
                    .await?
                    .ok_or_else(chunked_eof)?;
                raw.extend_from_slice(&trailer);
                if trailer == b"\r\n" {
                    return Ok(raw);
                }
            }
        }

        let data = conn.read_exact_bytes(size + 2).await?;
        if !data.ends_with(b"\r\n") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "chunk data is not terminated by CRLF",
            ));
        }
        raw.extend_from_slice(&data);
    }
}

fn chunked_eof() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed in the middle of a chunked body",
    )
}

fn invalid_chunk_size() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size line")
}

fn parse_request_head(raw: &[u8]) -> io::Result<Request> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request head is not UTF-8"))?;

    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "request line is missing"))?;

    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "request method is missing"))?;
    let target = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "request target is missing"))?;
    let version_text = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "HTTP version is missing"))?;
    if parts.next().is_some() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "request line has too many fields",
        ));
    }

    let version = parse_version(version_text)?;
    let headers = parse_headers(lines)?;
    let close = is_connection_close(version, &headers);
    let (host, scheme) = resolve_request_host(method, target, &headers);

    Ok(Request {
        method: method.to_string(),
        target: target.to_string(),
        version,
        headers,
        body: Vec::new(),
        host,
        scheme,
        close,
        remote_addr: None,
    })
}

fn parse_response_head(raw: &[u8], request_method: &str) -> io::Result<(Response, BodyMode)> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "response head is not UTF-8"))?;

    let mut lines = text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "status line is missing"))?;

    let mut parts = status_line.split_whitespace();
    let version_text = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "response version is missing"))?;
    let status_text = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "response status is missing"))?;
    let reason = parts.collect::<Vec<_>>().join(" ");

    let version = parse_version(version_text)?;
    let status = status_text
        .parse::<u16>()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid response status code"))?;

    let headers = parse_headers(lines)?;
    let mode = response_body_mode(&headers, request_method, status)?;
    let mut close = is_connection_close(version, &headers);
    if mode == BodyMode::CloseDelimited {
        close = true;
    }

    Ok((
        Response {
            version,
            status,
            reason,
            headers,
            body: Vec::new(),
            close,
        },
        mode,
    ))
}

fn parse_version(text: &str) -> io::Result<HttpVersion> {
    match text {
        "HTTP/1.0" => Ok(HttpVersion::Http10),
        "HTTP/1.1" => Ok(HttpVersion::Http11),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "only HTTP/1.0 and HTTP/1.1 are supported",
        )),
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> io::Result<Vec<Header>> {
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed header line"))?;
        headers.push(Header {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        });
    }
    Ok(headers)
}

fn request_body_mode(headers: &[Header]) -> io::Result<BodyMode> {
    if has_header_token(headers, "transfer-encoding", "chunked") {
        return Ok(BodyMode::Chunked);
    }
    if let Some(length) = content_length(headers)? {
        return Ok(if length == 0 {
            BodyMode::None
        } else {
            BodyMode::ContentLength(length)
        });
    }
    Ok(BodyMode::None)
}

fn response_body_mode(
    headers: &[Header],
    request_method: &str,
    status: u16,
) -> io::Result<BodyMode> {
    if request_method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&status)
        || status == 204
        || status == 304
    {
        return Ok(BodyMode::None);
    }

    if has_header_token(headers, "transfer-encoding", "chunked") {
        return Ok(BodyMode::Chunked);
    }
    if let Some(length) = content_length(headers)? {
        return Ok(if length == 0 {
            BodyMode::None
        } else {
            BodyMode::ContentLength(length)
        });
    }
    Ok(BodyMode::CloseDelimited)
}

fn content_length(headers: &[Header]) -> io::Result<Option<u64>> {
    let mut value = None;
    for header in headers {
        if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = header.value.parse::<u64>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "invalid Content-Length value")
            })?;
            value = Some(parsed);
        }
    }
    Ok(value)
}

fn has_header_token(headers: &[Header], name: &str, token: &str) -> bool {
    headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case(name))
        .flat_map(|header| header.value.split(','))
        .any(|value| value.trim().eq_ignore_ascii_case(token))
}

fn is_connection_close(version: HttpVersion, headers: &[Header]) -> bool {
    if has_header_token(headers, "connection", "close") {
        return true;
    }
    version == HttpVersion::Http10 && !has_header_token(headers, "connection", "keep-alive")
}

// Destination resolution: CONNECT carries an authority, absolute-form
// requests carry it in the target, everything else falls back to the Host
// header. The scheme only picks the default port here; the session overrides
// it per connection.
fn resolve_request_host(method: &str, target: &str, headers: &[Header]) -> (String, Scheme) {
    if method.eq_ignore_ascii_case("CONNECT") {
        return (target.to_string(), Scheme::Https);
    }

    if let Some(rest) = target.strip_prefix("http://") {
        return (authority_with_port(authority_of(rest), 80), Scheme::Http);
    }
    if let Some(rest) = target.strip_prefix("https://") {
        return (authority_with_port(authority_of(rest), 443), Scheme::Https);
    }

    let host = headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("host"))
        .map(|header| header.value.as_str())
        .unwrap_or("");
    (authority_with_port(host, 80), Scheme::Http)
}

fn authority_of(rest: &str) -> &str {
    rest.split(['/', '?']).next().unwrap_or("")
}

fn authority_with_port(authority: &str, default_port: u16) -> String {
    if authority.is_empty() {
        return String::new();
    }

    if let Some(bracket_close) = authority.find(']') {
        if authority[bracket_close..].contains(':') {
            return authority.to_string();
        }
        return format!("{authority}:{default_port}");
    }

    if authority.contains(':') {
        return authority.to_string();
    }
    format!("{authority}:{default_port}")
}

/// Splits `host:port`, handling bracketed IPv6 literals. `None` covers every
/// malformed shape: missing port, empty host, unbracketed IPv6.
pub(crate) fn split_host_port(authority: &str) -> Option<(String, u16)> {
    if let Some(rest) = authority.strip_prefix('[') {
        let (host, suffix) = rest.split_once(']')?;
        if host.is_empty() {
            return None;
        }
        let port_text = suffix.strip_prefix(':')?;
        let port = port_text.parse::<u16>().ok()?;
        return Some((host.to_string(), port));
    }

    let (host, port_text) = authority.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = port_text.parse::<u16>().ok()?;
    Some((host.to_string(), port))
}

fn origin_form(target: &str) -> &str {
    let rest = match target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        Some(rest) => rest,
        None => return if target.is_empty() { "/" } else { target },
    };

    match rest.find('/') {
        Some(position) => &rest[position..],
        None => "/",
    }
}

/// Strips hop-by-hop headers before a request is forwarded to the origin.
pub fn remove_proxy_headers(request: &mut Request) {
    request.remove_header("Accept-Encoding");
    request.remove_header("Proxy-Connection");
    request.remove_header("Proxy-Authenticate");
    request.remove_header("Proxy-Authorization");

    if request
        .header("Connection")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("close"))
    {
        request.remove_header("Connection");
        request.close = false;
    }
}

pub(crate) fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        504 => "Gateway Timeout",
        _ => "",
    }
}

/// Writes a bare HTTP/1.1 status line, used before a session exists or after
/// it failed to construct.
pub(crate) async fn write_status_line<W: AsyncWrite + Unpin>(
    stream: &mut W,
    status: u16,
) -> io::Result<()> {
    let line = format!("HTTP/1.1 {status} {}\r\n\r\n", status_text(status));
    stream.write_all(line.as_bytes()).await?;
    stream.flush().await
}
