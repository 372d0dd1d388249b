//! Single-mailbox PAC sandbox. The `boa_engine::Context` that actually holds
//! the parsed script is never stored on `self` — it's built fresh inside each
//! call and dropped before the `async fn` returns, so it never has to cross
//! an `.await` and `PacEngine` stays `Send` even though Boa's GC heap isn't.
//! `act_zero`'s single mailbox still gives us the serialization guarantee the
//! spec calls for: only one `set_script`/`find_proxy` runs at a time.

use std::net::{ToSocketAddrs, UdpSocket};

use act_zero::*;
use boa_engine::{js_string, Context, JsResult, JsValue, NativeFunction, Source};
use url::Url;

use crate::errors::ProxyError;

const PAC_UTILS: &str = include_str!("pac_utils.js");
const DEFAULT_SCRIPT: &str = "function FindProxyForURL(url, host) { return \"DIRECT\"; }";

pub struct PacEngine {
    script: String,
}

impl Default for PacEngine {
    fn default() -> Self {
        PacEngine {
            script: DEFAULT_SCRIPT.to_string(),
        }
    }
}

impl Actor for PacEngine {}

impl PacEngine {
    /// Parse and type-check a script without installing it. Returns the
    /// error the caller should report while leaving the previous script in
    /// place.
    fn validate(source: &str) -> Result<(), ProxyError> {
        let mut ctx = Context::default();
        register_natives(&mut ctx)?;
        run(&mut ctx, PAC_UTILS)?;
        run(&mut ctx, source)?;
        let is_fn = run(&mut ctx, "typeof FindProxyForURL === 'function'")?;
        if !is_fn.as_boolean().unwrap_or(false) {
            return Err(ProxyError::PacParse(
                "script does not define a FindProxyForURL function".to_string(),
            ));
        }
        Ok(())
    }

    fn evaluate(script: &str, url: &str) -> Result<String, ProxyError> {
        let parsed = Url::parse(url).map_err(|e| ProxyError::PacEval(format!("invalid url {url}: {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProxyError::PacEval(format!("url has no host: {url}")))?;

        let mut ctx = Context::default();
        register_natives(&mut ctx)?;
        run(&mut ctx, PAC_UTILS)?;
        run(&mut ctx, script)?;

        let call = format!(
            "FindProxyForURL({}, {})",
            json_quote(url),
            json_quote(host)
        );
        let result = run(&mut ctx, &call)?;
        let Some(js_str) = result.as_string() else {
            return Err(ProxyError::PacEval(
                "FindProxyForURL did not return a string".to_string(),
            ));
        };
        Ok(js_str.to_std_string_escaped())
    }
}

impl PacEngine {
    /// Replace the installed script. Fails (leaving the old script live) if
    /// the new one doesn't parse or doesn't define `FindProxyForURL`.
    pub async fn set_script(&mut self, source: String) -> ActorResult<Result<(), ProxyError>> {
        match Self::validate(&source) {
            Ok(()) => {
                self.script = source;
                Produces::ok(Ok(()))
            }
            Err(e) => Produces::ok(Err(e)),
        }
    }

    /// Evaluate `FindProxyForURL(url, host)` against the installed script.
    /// A throw, a parse error, or a non-string return all surface as
    /// `ProxyError::PacEval` — the caller (`resolver.rs`) treats that the
    /// same as an explicit `DIRECT` result.
    pub async fn find_proxy(&mut self, url: String) -> ActorResult<Result<String, ProxyError>> {
        let script = self.script.clone();
        Produces::ok(Self::evaluate(&script, &url))
    }
}

fn run(ctx: &mut Context, src: &str) -> Result<JsValue, ProxyError> {
    ctx.eval(Source::from_bytes(src))
        .map_err(|e| ProxyError::PacParse(e.to_string()))
}

fn json_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Resolve a hostname to its first IPv4 address, blocking. PAC evaluation
/// already runs off the tokio reactor (inside the single-threaded mailbox),
/// so a blocking getaddrinfo call here doesn't stall anything else.
fn resolve_ipv4(host: &str) -> Option<std::net::Ipv4Addr> {
    (host, 0)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr.ip() {
            std::net::IpAddr::V4(v4) => Some(v4),
            std::net::IpAddr::V6(_) => None,
        })
}

fn native_dns_resolve(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let host = arg_string(args, 0);
    match resolve_ipv4(&host) {
        Some(ip) => Ok(JsValue::from(js_string!(ip.to_string().as_str()))),
        None => Ok(JsValue::null()),
    }
}

fn native_is_resolvable(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let host = arg_string(args, 0);
    Ok(JsValue::from(resolve_ipv4(&host).is_some()))
}

fn native_my_ip_address(_this: &JsValue, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let ip = local_outbound_ip().unwrap_or_else(|| "127.0.0.1".to_string());
    Ok(JsValue::from(js_string!(ip.as_str())))
}

/// Best-effort "what's my address" the way nanoproxy's own dialing code
/// would see it: open a UDP socket toward a well-known address (no packet
/// ever sent, so this doesn't depend on reachability) and read back the
/// local address the kernel picked.
fn local_outbound_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip().to_string())
}

fn arg_string(args: &[JsValue], idx: usize) -> String {
    args.get(idx)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default()
}

fn register_natives(ctx: &mut Context) -> Result<(), ProxyError> {
    let register = |ctx: &mut Context, name: &str, len: usize, f: fn(&JsValue, &[JsValue], &mut Context) -> JsResult<JsValue>| {
        ctx.register_global_builtin_callable(js_string!(name), len, NativeFunction::from_fn_ptr(f))
    };
    register(ctx, "dnsResolve", 1, native_dns_resolve)
        .map_err(|e| ProxyError::PacParse(format!("failed to install dnsResolve: {e}")))?;
    register(ctx, "isResolvable", 1, native_is_resolvable)
        .map_err(|e| ProxyError::PacParse(format!("failed to install isResolvable: {e}")))?;
    register(ctx, "myIpAddress", 0, native_my_ip_address)
        .map_err(|e| ProxyError::PacParse(format!("failed to install myIpAddress: {e}")))?;
    Ok(())
}
