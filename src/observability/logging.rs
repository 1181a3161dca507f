//! Structured logging configuration.

use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log format.
pub const LOG_FORMAT_ENV: &str = "CLASS_LIKES_LOG_FORMAT";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name; anything but `json` is pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Level filter, from `RUST_LOG` when set.
    pub filter: EnvFilter,
    /// Output format.
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Builds logging configuration from the environment.
    ///
    /// `RUST_LOG` wins over `verbose`; otherwise the default level is `info`,
    /// or `debug` for this crate when `verbose` is set.
    #[must_use]
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var(LOG_FORMAT_ENV)
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Self {
            filter: Self::filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), verbose),
            format,
        }
    }

    fn filter(directives: Option<&str>, verbose: bool) -> EnvFilter {
        let fallback = if verbose {
            "info,class_likes=debug,tower_http=debug"
        } else {
            "info"
        };
        directives
            .filter(|d| !d.trim().is_empty())
            .and_then(|d| EnvFilter::try_new(d).ok())
            .unwrap_or_else(|| EnvFilter::new(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("xml"), LogFormat::Pretty);
    }

    #[test]
    fn test_filter_fallbacks() {
        assert_eq!(LoggingConfig::filter(None, false).to_string(), "info");
        assert!(
            LoggingConfig::filter(None, true)
                .to_string()
                .contains("class_likes=debug")
        );
        assert_eq!(
            LoggingConfig::filter(Some("warn"), true).to_string(),
            "warn"
        );
    }
}
