//! Logging and trace-export flags.
//!
//! The OTLP flags read the standard `OTEL_*` variables, so a collector set up for
//! other services works unchanged. Export is off unless an endpoint is given.

use anyhow::{Context, Result};
use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgMatches, Command};
use tracing::Level;

pub const ARG_VERBOSITY: &str = "verbose";
pub const ARG_LOG_LEVEL: &str = "log-level";
pub const ARG_LOG_FORMAT: &str = "log-format";
pub const ARG_OTLP_ENDPOINT: &str = "otlp-endpoint";
pub const ARG_OTLP_HEADERS: &str = "otlp-headers";
pub const ARG_SERVICE_INSTANCE_ID: &str = "service-instance-id";

const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Where and how to export spans.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtlpOptions {
    pub endpoint: String,
    /// gRPC metadata sent with every export, `key=value` pairs.
    pub headers: Vec<(String, String)>,
    pub instance_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    pub level: Level,
    pub format: LogFormat,
    pub otlp: Option<OtlpOptions>,
}

impl Options {
    /// `--log-level` wins over `-v`; without either only errors are logged.
    ///
    /// # Errors
    /// Returns an error if a value slipped past the parsers.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let level = match matches.get_one::<String>(ARG_LOG_LEVEL) {
            Some(name) => name
                .parse::<Level>()
                .with_context(|| format!("invalid log level: {name}"))?,
            None => level_from_count(matches.get_count(ARG_VERBOSITY)),
        };

        let format = match matches.get_one::<String>(ARG_LOG_FORMAT).map(String::as_str) {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let otlp = matches
            .get_one::<String>(ARG_OTLP_ENDPOINT)
            .filter(|endpoint| !endpoint.trim().is_empty())
            .map(|endpoint| OtlpOptions {
                endpoint: endpoint.trim().to_string(),
                headers: matches
                    .get_one::<Vec<(String, String)>>(ARG_OTLP_HEADERS)
                    .cloned()
                    .unwrap_or_default(),
                instance_id: matches.get_one::<String>(ARG_SERVICE_INSTANCE_ID).cloned(),
            });

        Ok(Self {
            level,
            format,
            otlp,
        })
    }
}

const fn level_from_count(count: u8) -> Level {
    match count {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Parse `key=value,key2=value2`; blank entries are skipped, anything else
/// without `=` or with an empty key is rejected.
fn parse_headers(raw: &str) -> std::result::Result<Vec<(String, String)>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_ascii_lowercase(), value.trim().to_string()))
            }
            _ => Err(format!("expected key=value, got {pair:?}")),
        })
        .collect()
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_VERBOSITY)
                .short('v')
                .long(ARG_VERBOSITY)
                .help("Raise log verbosity: -v warn, -vv info, -vvv debug, -vvvv trace")
                .global(true)
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .long(ARG_LOG_LEVEL)
                .help("Log level; overrides -v")
                .env("WARDEN_LOG_LEVEL")
                .ignore_case(true)
                .value_parser(PossibleValuesParser::new(LEVELS)),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .long(ARG_LOG_FORMAT)
                .help("Log output format")
                .env("WARDEN_LOG_FORMAT")
                .default_value("pretty")
                .value_parser(PossibleValuesParser::new(["pretty", "json"])),
        )
        .arg(
            Arg::new(ARG_OTLP_ENDPOINT)
                .long(ARG_OTLP_ENDPOINT)
                .help("OTLP gRPC collector; spans are exported only when set")
                .env("OTEL_EXPORTER_OTLP_ENDPOINT"),
        )
        .arg(
            Arg::new(ARG_OTLP_HEADERS)
                .long(ARG_OTLP_HEADERS)
                .help("Metadata for the collector, as key=value pairs separated by commas")
                .env("OTEL_EXPORTER_OTLP_HEADERS")
                .hide_env_values(true)
                .value_parser(parse_headers),
        )
        .arg(
            Arg::new(ARG_SERVICE_INSTANCE_ID)
                .long(ARG_SERVICE_INSTANCE_ID)
                .help("service.instance.id resource attribute (default: a fresh ULID)")
                .env("OTEL_SERVICE_INSTANCE_ID"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_ENV: [(&str, Option<&str>); 5] = [
        ("WARDEN_LOG_LEVEL", None),
        ("WARDEN_LOG_FORMAT", None),
        ("OTEL_EXPORTER_OTLP_ENDPOINT", None),
        ("OTEL_EXPORTER_OTLP_HEADERS", None),
        ("OTEL_SERVICE_INSTANCE_ID", None),
    ];

    fn parse(args: &[&str]) -> Result<Options> {
        let mut argv = vec!["warden"];
        argv.extend_from_slice(args);
        let matches = with_args(Command::new("warden")).try_get_matches_from(argv)?;
        Options::parse(&matches)
    }

    #[test]
    fn defaults_log_errors_without_export() {
        temp_env::with_vars(CLEAN_ENV, || {
            let options = parse(&[]).ok();
            assert_eq!(
                options,
                Some(Options {
                    level: Level::ERROR,
                    format: LogFormat::Pretty,
                    otlp: None,
                })
            );
        });
    }

    #[test]
    fn verbosity_count_raises_level() {
        temp_env::with_vars(CLEAN_ENV, || {
            let expected = [Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE, Level::TRACE];
            for (count, level) in (1..=5).zip(expected) {
                let flag = format!("-{}", "v".repeat(count));
                assert_eq!(parse(&[flag.as_str()]).map(|o| o.level).ok(), Some(level), "{flag}");
            }
        });
    }

    #[test]
    fn log_level_overrides_count() {
        temp_env::with_vars(CLEAN_ENV, || {
            assert_eq!(
                parse(&["-vvvv", "--log-level", "warn"]).map(|o| o.level).ok(),
                Some(Level::WARN)
            );
            assert_eq!(
                parse(&["--log-level", "DEBUG"]).map(|o| o.level).ok(),
                Some(Level::DEBUG)
            );
            assert!(parse(&["--log-level", "loud"]).is_err());
        });
    }

    #[test]
    fn log_settings_from_env() {
        temp_env::with_vars(
            [
                ("WARDEN_LOG_LEVEL", Some("info")),
                ("WARDEN_LOG_FORMAT", Some("json")),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", None),
            ],
            || {
                let options = parse(&[]).ok();
                assert_eq!(options.as_ref().map(|o| o.level), Some(Level::INFO));
                assert_eq!(options.map(|o| o.format), Some(LogFormat::Json));
            },
        );
    }

    #[test]
    fn otlp_settings_from_env() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("collector.example.com:4317")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("Authorization=Bearer abc, x-team = auth")),
                ("OTEL_SERVICE_INSTANCE_ID", Some("warden-1")),
            ],
            || {
                let otlp = parse(&[]).ok().and_then(|o| o.otlp);
                assert_eq!(
                    otlp,
                    Some(OtlpOptions {
                        endpoint: "collector.example.com:4317".to_string(),
                        headers: vec![
                            ("authorization".to_string(), "Bearer abc".to_string()),
                            ("x-team".to_string(), "auth".to_string()),
                        ],
                        instance_id: Some("warden-1".to_string()),
                    })
                );
            },
        );
    }

    #[test]
    fn blank_endpoint_disables_export() {
        temp_env::with_vars(CLEAN_ENV, || {
            assert_eq!(parse(&["--otlp-endpoint", "  "]).ok().and_then(|o| o.otlp), None);
        });
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(parse_headers(" , "), Ok(Vec::new()));
        assert!(parse_headers("novalue").is_err());
        assert!(parse_headers("=value").is_err());
        assert_eq!(
            parse_headers("a=1=2"),
            Ok(vec![("a".to_string(), "1=2".to_string())])
        );
    }
}
