//! Maps validated CLI matches to the action to run.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{self, auth};
use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

/// Shortest accepted session secret, in bytes.
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let session_secret = matches
        .get_one::<String>(commands::ARG_SESSION_SECRET)
        .cloned()
        .context("missing required argument: --session-secret")?;
    if session_secret.len() < MIN_SESSION_SECRET_LEN {
        bail!("session secret must be at least {MIN_SESSION_SECRET_LEN} bytes");
    }

    let upload_dir = matches
        .get_one::<PathBuf>(commands::ARG_UPLOAD_DIR)
        .cloned()
        .context("missing required argument: --upload-dir")?;

    let auth = auth::Options::parse(matches)?;
    if !auth.rate_limit_rps.is_finite() || auth.rate_limit_rps <= 0.0 {
        bail!("rate limit must be a positive number of requests per second");
    }

    Ok(Action::Server(Args {
        port,
        dsn,
        session_secret: SecretString::from(session_secret),
        upload_dir,
        base_url: auth.base_url,
        session_ttl_seconds: auth.session_ttl_seconds,
        rate_limit_rps: auth.rate_limit_rps,
        rate_limit_burst: auth.rate_limit_burst,
        rate_limit_expiry_seconds: auth.rate_limit_expiry_seconds,
    }))
}
