//! Tracing initialization shared by the MCP and HTTP entry points

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where the process is talking to its caller
///
/// Logs always go to stderr. When stdout carries the MCP protocol the
/// output must stay free of ANSI escapes so log captures remain readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// stdout is reserved for the line-oriented RPC protocol
    Stdio,
    /// Interactive or daemonised HTTP server
    Console,
}

/// Initialize tracing for a server binary
///
/// - Environment-based filtering via `RUST_LOG`
/// - Default level `info` for `crate_name`
/// - `LOG_FORMAT=json` switches to structured JSON lines
pub fn init_tracing(crate_name: &str, target: LogTarget) -> anyhow::Result<()> {
    let directive = format!("{}=info", crate_name);
    let filter = EnvFilter::from_default_env().add_directive(directive.parse()?);

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(target == LogTarget::Console),
            )
            .try_init()?;
    }

    Ok(())
}
