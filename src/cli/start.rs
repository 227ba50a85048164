use crate::cli::{
    actions::Action,
    commands::{self, telemetry::Options as TelemetryOptions},
    dispatch, telemetry,
};
use anyhow::Result;

/// Parse the command line, install logging and pick the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialised or the flags are inconsistent.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(&TelemetryOptions::parse(&matches)?)?;

    dispatch::handler(&matches)
}
