use std::fmt;

// Some are fatal at startup, most degrade gracefully at runtime.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Bad CLI args or an unreadable/unparseable config file. Fatal at startup.
    Config(String),
    /// DBus unavailable, properties missing, etc. Logged, degrades to empty info.
    NetworkInfo(String),
    /// WPAD candidate connect/HTTP/timeout failure. Logged, try next candidate.
    WpadFetch(String),
    /// PAC script failed to parse/load. Previous script stays installed.
    PacParse(String),
    /// `FindProxyForURL` threw or returned a non-string. Treated as DIRECT.
    PacEval(String),
    /// Malformed request line/headers from the client.
    RequestParse(String),
    /// Couldn't dial the chosen upstream (direct host or configured proxy).
    UpstreamDial(String),
    /// I/O failure while shuttling bytes in either direction of a tunnel.
    TunnelIo(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Config(msg) => write!(f, "configuration error: {msg}"),
            ProxyError::NetworkInfo(msg) => write!(f, "network info error: {msg}"),
            ProxyError::WpadFetch(msg) => write!(f, "WPAD fetch error: {msg}"),
            ProxyError::PacParse(msg) => write!(f, "PAC parse error: {msg}"),
            ProxyError::PacEval(msg) => write!(f, "PAC evaluation error: {msg}"),
            ProxyError::RequestParse(msg) => write!(f, "request parse error: {msg}"),
            ProxyError::UpstreamDial(msg) => write!(f, "upstream dial error: {msg}"),
            ProxyError::TunnelIo(msg) => write!(f, "tunnel I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::TunnelIo(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
