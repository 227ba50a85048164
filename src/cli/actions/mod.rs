//! What the binary does once its flags are validated.

pub mod server;

use crate::cli::telemetry;
use anyhow::Result;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// Run the action, then flush exported spans whatever the outcome.
    ///
    /// # Errors
    /// Returns the action's error.
    pub async fn execute(self) -> Result<()> {
        let result = match self {
            Self::Server(args) => server::execute(args).await,
        };
        telemetry::shutdown_tracer();
        result
    }
}
