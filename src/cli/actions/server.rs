use crate::{api, auth::AuthConfig};
use anyhow::Result;
use secrecy::SecretString;
use std::path::PathBuf;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub session_secret: SecretString,
    pub upload_dir: PathBuf,
    pub base_url: String,
    pub session_ttl_seconds: i64,
    pub rate_limit_rps: f64,
    pub rate_limit_burst: u32,
    pub rate_limit_expiry_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.base_url.clone())
            .with_session_ttl_seconds(self.session_ttl_seconds)
            .with_rate_limit(
                self.rate_limit_rps,
                self.rate_limit_burst,
                self.rate_limit_expiry_seconds,
            )
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the record store is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let auth_config = args.auth_config();
    api::new(
        args.port,
        args.dsn,
        args.session_secret,
        args.upload_dir,
        auth_config,
    )
    .await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("upload_dir", args.upload_dir.display().to_string()),
        ("base_url", args.base_url.clone()),
        ("session_ttl", format!("{}s", args.session_ttl_seconds)),
        (
            "rate_limit",
            format!(
                "{} rps, burst {}, expiry {}s",
                args.rate_limit_rps, args.rate_limit_burst, args.rate_limit_expiry_seconds
            ),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> String {
    hash.trim().chars().take(7).collect()
}
