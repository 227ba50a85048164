use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_SESSION_TTL: &str = "session-ttl";
pub const ARG_RATE_LIMIT_RPS: &str = "rate-limit-rps";
pub const ARG_RATE_LIMIT_BURST: &str = "rate-limit-burst";
pub const ARG_RATE_LIMIT_EXPIRY: &str = "rate-limit-expiry";

/// Session and abuse-control settings.
#[derive(Debug, Clone)]
pub struct Options {
    pub base_url: String,
    pub session_ttl_seconds: i64,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub rate_limit_expiry_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if an argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            base_url: matches
                .get_one::<String>(ARG_BASE_URL)
                .cloned()
                .context("missing required argument: --base-url")?,
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL)
                .copied()
                .context("missing required argument: --session-ttl")?,
            rate_limit_rps: matches
                .get_one::<f64>(ARG_RATE_LIMIT_RPS)
                .copied()
                .context("missing required argument: --rate-limit-rps")?,
            rate_limit_burst: matches
                .get_one::<u32>(ARG_RATE_LIMIT_BURST)
                .copied()
                .context("missing required argument: --rate-limit-burst")?,
            rate_limit_expiry_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_EXPIRY)
                .copied()
                .context("missing required argument: --rate-limit-expiry")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public base URL used in email links; https enables Secure cookies")
                .env("WARDEN_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL)
                .long(ARG_SESSION_TTL)
                .help("Session cookie TTL in seconds")
                .env("WARDEN_SESSION_TTL")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_RPS)
                .long(ARG_RATE_LIMIT_RPS)
                .help("Requests per second allowed per client")
                .env("WARDEN_RATE_LIMIT_RPS")
                .default_value("5")
                .value_parser(clap::value_parser!(f64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_BURST)
                .long(ARG_RATE_LIMIT_BURST)
                .help("Burst size per client")
                .env("WARDEN_RATE_LIMIT_BURST")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_EXPIRY)
                .long(ARG_RATE_LIMIT_EXPIRY)
                .help("Seconds an idle client bucket is kept")
                .env("WARDEN_RATE_LIMIT_EXPIRY")
                .default_value("180")
                .value_parser(clap::value_parser!(u64)),
        )
}
