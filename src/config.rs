//! CLI surface plus the two-line INI grammar for `--config`'s `[wpad]
//! url = ...` file. The grammar is small enough that hand-parsing it (the
//! way the teacher hand-parses `/etc/resolv.conf`-adjacent formats rather
//! than pulling in a crate) is the natural fit.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(version = env!("NANOPROXY_VERSION"), author = env!("CARGO_PKG_AUTHORS"))]
pub struct Opts {
    /// Path to an INI file containing `[wpad] url = <URL>`.
    #[clap(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Address to bind: an IP literal or a hostname resolved via IPv4.
    #[clap(long, short = 'b', default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on.
    #[clap(long, short = 'p')]
    pub port: u16,

    /// A PAC-result-format string applied to every request; disables WPAD.
    #[clap(long, short = 'F')]
    pub force_proxy: Option<String>,

    #[clap(long, default_value = "info")]
    pub loglevel: LogLevel,

    /// Switch logging to the service-manager journal and emit the
    /// readiness notification once the listener is bound.
    #[clap(long, default_value = "false")]
    pub systemd: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_tracing_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Opts {
    /// `LOG_LEVEL` overrides `--loglevel` when set.
    pub fn effective_log_filter(&self) -> String {
        std::env::var("LOG_LEVEL").unwrap_or_else(|_| self.as_str_loglevel().to_string())
    }

    fn as_str_loglevel(&self) -> &'static str {
        self.loglevel.as_tracing_filter()
    }
}

/// Minimal `[section]\nkey = value` reader: enough for `[wpad] url = ...`.
/// Unknown keys and sections are ignored rather than rejected.
pub fn read_wpad_url_from_config(path: &std::path::Path) -> Result<Option<String>, crate::errors::ProxyError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| crate::errors::ProxyError::Config(format!("failed to read {}: {e}", path.display())))?;

    let mut section = String::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            section = name.trim().to_lowercase();
            continue;
        }
        if section != "wpad" {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim().eq_ignore_ascii_case("url") {
                return Ok(Some(value.trim().to_string()));
            }
        }
    }
    Ok(None)
}
