use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;
use uuid::Uuid;

use crate::errors::ProxyError;
use crate::model::{HostPort, ProxyDirective, SessionState};
use crate::resolver::ProxyResolver;
use crate::tracker::ConnectionTracker;

pub struct ConnectionHandler {
    resolver: Arc<ProxyResolver>,
    tracker: Arc<ConnectionTracker>,
}

struct ParsedRequest {
    method: String,
    // CONNECT: host:port. Other methods: the request-target as sent.
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    // Set when `body` was reassembled from a chunked incoming transfer, so
    // the forward path can replace the chunk framing with a computed
    // Content-Length instead of resending the original Transfer-Encoding.
    was_chunked: bool,
}

impl ConnectionHandler {
    pub fn new(resolver: Arc<ProxyResolver>, tracker: Arc<ConnectionTracker>) -> Self {
        ConnectionHandler { resolver, tracker }
    }

    pub async fn handle(&self, client: TcpStream) {
        let id = Uuid::new_v4();
        self.tracker.opened(id, SessionState::Reading).await;
        let mut client = BufReader::new(client);

        let request = match read_request(&mut client).await {
            Ok(request) => request,
            Err(e) => {
                warn!(connection = %id, error = %e, "connection terminated with error");
                let _ = client
                    .get_mut()
                    .write_all(b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n")
                    .await;
                self.tracker.closed(id).await;
                return;
            }
        };
        let is_connect = request.method.eq_ignore_ascii_case("CONNECT");

        let result = if is_connect {
            self.serve_connect(id, &mut client, &request).await
        } else {
            self.serve_forward(id, &mut client, &request).await
        };

        if let Err(e) = result {
            warn!(connection = %id, error = %e, "connection terminated with error");
            // CONNECT dial failures close immediately instead of sending a
            // 502: the client never got a tunnel handshake to interpret.
            let response = match &e {
                ProxyError::RequestParse(_) => Some("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n"),
                ProxyError::UpstreamDial(_) if !is_connect => Some("HTTP/1.1 502 Bad Gateway\r\nConnection: close\r\n\r\n"),
                _ => None,
            };
            if let Some(body) = response {
                let _ = client.get_mut().write_all(body.as_bytes()).await;
            }
        }
        self.tracker.closed(id).await;
    }

    async fn serve_connect(
        &self,
        id: Uuid,
        client: &mut BufReader<TcpStream>,
        request: &ParsedRequest,
    ) -> Result<(), ProxyError> {
        let target = HostPort::parse_connect_target(&request.target)?;
        self.tracker.transition(id, SessionState::Resolving).await;
        let directive = self.resolver.resolve(&format!("http://{}", target.host)).await;

        self.tracker.transition(id, SessionState::Dialing).await;
        match directive.first() {
            ProxyDirective::Direct => {
                let mut upstream = TcpStream::connect(target.to_authority())
                    .await
                    .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;
                client
                    .get_mut()
                    .write_all(b"HTTP/1.1 200 OK\r\n\r\n")
                    .await
                    .map_err(ProxyError::from)?;
                self.tunnel(id, client, &mut upstream).await
            }
            ProxyDirective::Proxy { host, port } => {
                let mut upstream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;
                let request_line = format!(
                    "CONNECT {} HTTP/1.1\r\nhost: {}\r\n\r\n",
                    target.to_authority(),
                    target.host
                );
                upstream
                    .write_all(request_line.as_bytes())
                    .await
                    .map_err(ProxyError::from)?;
                // The upstream's handshake reply (200/4xx/5xx) is relayed
                // verbatim, not parsed — the client, not us, interprets it.
                self.tunnel(id, client, &mut upstream).await
            }
        }
    }

    async fn serve_forward(
        &self,
        id: Uuid,
        client: &mut BufReader<TcpStream>,
        request: &ParsedRequest,
    ) -> Result<(), ProxyError> {
        let host_port = parse_origin_target(&request.target, &request.headers)?;
        self.tracker.transition(id, SessionState::Resolving).await;
        let directive = self.resolver.resolve(&format!("http://{}", host_port.host)).await;

        self.tracker.transition(id, SessionState::Dialing).await;
        let (mut upstream, request_line) = match directive.first() {
            ProxyDirective::Direct => {
                let upstream = TcpStream::connect(host_port.to_authority())
                    .await
                    .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;
                let relative = relative_target(&request.target);
                (upstream, format!("{} {} HTTP/1.1", request.method, relative))
            }
            ProxyDirective::Proxy { host, port } => {
                let upstream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(|e| ProxyError::UpstreamDial(e.to_string()))?;
                (upstream, format!("{} {} HTTP/1.1", request.method, request.target))
            }
        };

        let mut out = request_line;
        out.push_str("\r\n");
        out.push_str(&build_forward_headers(
            &request.headers,
            request.was_chunked,
            request.body.len(),
            &host_port.host,
        ));

        self.tracker.transition(id, SessionState::Forwarding).await;
        upstream.write_all(out.as_bytes()).await.map_err(ProxyError::from)?;
        if !request.body.is_empty() {
            upstream.write_all(&request.body).await.map_err(ProxyError::from)?;
        }

        tokio::io::copy(&mut upstream, client.get_mut())
            .await
            .map_err(ProxyError::from)?;
        Ok(())
    }

    // Takes the `BufReader` itself, not its inner `TcpStream`: any client
    // bytes already pulled into the `BufReader`'s buffer while reading the
    // CONNECT request-line/headers (e.g. a pipelined first TLS record) live
    // there and would otherwise be silently dropped. `BufReader` forwards
    // writes straight to the inner stream, so it's a drop-in AsyncRead+Write.
    async fn tunnel(&self, id: Uuid, client: &mut BufReader<TcpStream>, upstream: &mut TcpStream) -> Result<(), ProxyError> {
        self.tracker.transition(id, SessionState::Tunneling).await;
        tokio::io::copy_bidirectional(client, upstream)
            .await
            .map_err(ProxyError::from)?;
        self.tracker.transition(id, SessionState::Closing).await;
        Ok(())
    }
}

fn parse_origin_target(target: &str, headers: &[(String, String)]) -> Result<HostPort, ProxyError> {
    if let Ok(url) = url::Url::parse(target) {
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::RequestParse(format!("request target has no host: {target}")))?
            .to_string();
        let port = url.port().unwrap_or(80);
        return Ok(HostPort { host, port });
    }

    let host_header = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.as_str())
        .ok_or_else(|| ProxyError::RequestParse("relative request target without Host header".to_string()))?;

    match host_header.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| ProxyError::RequestParse(format!("invalid port in Host header: {host_header}")))?;
            Ok(HostPort {
                host: host.to_string(),
                port,
            })
        }
        None => Ok(HostPort {
            host: host_header.to_string(),
            port: 80,
        }),
    }
}

// Renders the header block (including the blank line terminating it) sent
// upstream for a forwarded non-CONNECT request. When the incoming body was
// de-chunked (`was_chunked`), the original `Transfer-Encoding`/
// `Content-Length` headers are dropped in favor of a freshly computed
// `Content-Length` matching the already-decoded `body_len` bytes — resending
// `Transfer-Encoding: chunked` alongside un-chunked bytes would have the
// upstream parse chunk-size lines against raw body data.
fn build_forward_headers(headers: &[(String, String)], was_chunked: bool, body_len: usize, host: &str) -> String {
    let mut out = String::new();
    let mut has_host = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("host") {
            has_host = true;
        }
        if was_chunked && (name.eq_ignore_ascii_case("transfer-encoding") || name.eq_ignore_ascii_case("content-length")) {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !has_host {
        out.push_str("Host: ");
        out.push_str(host);
        out.push_str("\r\n");
    }
    if was_chunked {
        out.push_str(&format!("Content-Length: {body_len}\r\n"));
    }
    out.push_str("\r\n");
    out
}

fn relative_target(target: &str) -> String {
    if let Ok(url) = url::Url::parse(target) {
        let mut rel = url.path().to_string();
        if let Some(query) = url.query() {
            rel.push('?');
            rel.push_str(query);
        }
        if let Some(fragment) = url.fragment() {
            rel.push('#');
            rel.push_str(fragment);
        }
        if rel.is_empty() {
            rel.push('/');
        }
        rel
    } else if target.is_empty() {
        "/".to_string()
    } else {
        target.to_string()
    }
}

async fn read_request(client: &mut BufReader<TcpStream>) -> Result<ParsedRequest, ProxyError> {
    let mut line = String::new();
    let n = client
        .read_line(&mut line)
        .await
        .map_err(|e| ProxyError::RequestParse(e.to_string()))?;
    if n == 0 {
        return Err(ProxyError::RequestParse("client closed before sending a request".to_string()));
    }
    let line = line.trim_end();
    let mut parts = line.splitn(3, ' ');
    let method = parts
        .next()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| ProxyError::RequestParse(format!("malformed request line: {line}")))?
        .to_string();
    let target = parts
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProxyError::RequestParse(format!("malformed request line: {line}")))?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    loop {
        let mut header_line = String::new();
        let n = client
            .read_line(&mut header_line)
            .await
            .map_err(|e| ProxyError::RequestParse(e.to_string()))?;
        if n == 0 {
            return Err(ProxyError::RequestParse("connection closed mid-headers".to_string()));
        }
        let header_line = header_line.trim_end();
        if header_line.is_empty() {
            break;
        }
        let (name, value) = header_line
            .split_once(':')
            .ok_or_else(|| ProxyError::RequestParse(format!("malformed header: {header_line}")))?;
        let name = name.trim().to_string();
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok();
        }
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked") {
            chunked = true;
        }
        headers.push((name, value));
    }

    let body = if method.eq_ignore_ascii_case("CONNECT") {
        Vec::new()
    } else if chunked {
        read_chunked_body(client).await?
    } else if let Some(len) = content_length {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.map_err(|e| ProxyError::RequestParse(e.to_string()))?;
        buf
    } else {
        Vec::new()
    };

    Ok(ParsedRequest {
        method,
        target,
        headers,
        body,
        was_chunked: chunked,
    })
}

async fn read_chunked_body(client: &mut BufReader<TcpStream>) -> Result<Vec<u8>, ProxyError> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        client
            .read_line(&mut size_line)
            .await
            .map_err(|e| ProxyError::RequestParse(e.to_string()))?;
        let size_line = size_line.trim();
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or(""), 16)
            .map_err(|_| ProxyError::RequestParse(format!("invalid chunk size: {size_line}")))?;
        if size == 0 {
            // Trailing CRLF after the terminating zero-size chunk (and any
            // trailer headers, which this handler doesn't forward).
            loop {
                let mut trailer = String::new();
                let n = client.read_line(&mut trailer).await.map_err(|e| ProxyError::RequestParse(e.to_string()))?;
                if n == 0 || trailer.trim().is_empty() {
                    break;
                }
            }
            break;
        }
        let mut chunk = vec![0u8; size];
        client.read_exact(&mut chunk).await.map_err(|e| ProxyError::RequestParse(e.to_string()))?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        client.read_exact(&mut crlf).await.map_err(|e| ProxyError::RequestParse(e.to_string()))?;
    }
    Ok(body)
}
