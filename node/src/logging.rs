//! # Logging
//!
//! Sets up the `tracing` subscriber for the node. Output goes to stderr —
//! stdout belongs to structured command output (the `status` subcommand
//! prints JSON there) — and `RUST_LOG` overrides the default directives
//! when set.

use tracing_subscriber::{fmt, EnvFilter};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Colored, human-oriented lines with file/line locations. The
    /// development default.
    Pretty,
    /// One JSON object per line, for log aggregation in deployments.
    Json,
}

impl LogFormat {
    /// Parses a format name, falling back to `Pretty` for anything
    /// unrecognized — a misspelled flag should not keep a relief node
    /// from starting.
    pub fn parse_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Installs the global subscriber. Call once, before anything logs;
/// a second call panics.
///
/// `default_directives` is the filter used when `RUST_LOG` is absent,
/// e.g. `"amparo_node=info,amparo_custody=info"`.
pub fn init(default_directives: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match format {
        LogFormat::Pretty => builder.with_file(true).with_line_number(true).init(),
        LogFormat::Json => builder.json().init(),
    }

    tracing::debug!(?format, "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_lossy() {
        assert_eq!(LogFormat::parse_lossy("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse_lossy("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse_lossy("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse_lossy("yaml-ish"), LogFormat::Pretty);
    }
}
