use crate::errors::ProxyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyDirective {
    Direct,
    Proxy { host: String, port: u16 },
}

impl ProxyDirective {
    fn parse_one(token: &str) -> Option<ProxyDirective> {
        let token = token.trim();
        if token == "DIRECT" {
            return Some(ProxyDirective::Direct);
        }
        let rest = token.strip_prefix("PROXY ")?;
        let (host, port) = rest.trim().rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(ProxyDirective::Proxy {
            host: host.to_string(),
            port,
        })
    }

    pub fn format(&self) -> String {
        match self {
            ProxyDirective::Direct => "DIRECT".to_string(),
            ProxyDirective::Proxy { host, port } => format!("PROXY {host}:{port}"),
        }
    }
}

// An empty result, or a token that doesn't match the grammar, becomes
// Direct rather than dropping the whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveList(Vec<ProxyDirective>);

impl DirectiveList {
    pub fn direct() -> Self {
        DirectiveList(vec![ProxyDirective::Direct])
    }

    pub fn parse(raw: &str) -> Self {
        let tokens: Vec<&str> = raw.split(';').map(str::trim).filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return DirectiveList::direct();
        }

        let directives: Vec<ProxyDirective> = tokens
            .into_iter()
            .map(|t| ProxyDirective::parse_one(t).unwrap_or(ProxyDirective::Direct))
            .collect();
        DirectiveList(directives)
    }

    pub fn first(&self) -> &ProxyDirective {
        self.0.first().expect("DirectiveList is never empty")
    }

    pub fn format(&self) -> String {
        self.0.iter().map(ProxyDirective::format).collect::<Vec<_>>().join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Reading,
    Resolving,
    Dialing,
    Forwarding,
    Tunneling,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Reading => "reading",
            SessionState::Resolving => "resolving",
            SessionState::Dialing => "dialing",
            SessionState::Forwarding => "forwarding",
            SessionState::Tunneling => "tunneling",
            SessionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn to_authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // Split on the rightmost ':' so bracketed IPv6 literals survive intact.
    pub fn parse_connect_target(target: &str) -> Result<HostPort, ProxyError> {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| ProxyError::RequestParse(format!("CONNECT target missing port: {target}")))?;
        if host.is_empty() {
            return Err(ProxyError::RequestParse(format!("CONNECT target missing host: {target}")));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ProxyError::RequestParse(format!("CONNECT target has invalid port: {target}")))?;
        Ok(HostPort {
            host: host.to_string(),
            port,
        })
    }
}
