use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::LogFormat;
use crate::workflow::{RoleId, TicketId};

/// Installs the global subscriber. `RUST_LOG` wins over `verbose` when set.
/// Logs go to stderr so command output on stdout stays machine readable.
pub fn init_logging(verbose: bool, format: LogFormat) -> Result<()> {
    let default_level = if verbose { "ticketflow=debug" } else { "ticketflow=warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?,
    }
    Ok(())
}

pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span wrapping one public workflow operation.
pub fn operation_span(
    operation: &'static str,
    ticket: Option<TicketId>,
    actor: Option<RoleId>,
) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        op = operation,
        ticket = ticket.map(|t| t.0),
        actor = actor.map(|r| r.0),
        correlation = %generate_correlation_id(),
    )
}
