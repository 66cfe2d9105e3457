use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging on stderr, leaving stdout to command output.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_tracing(level: &str, json_format: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact())
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::debug!(level, json = json_format, "vhostd logging initialized");
    Ok(())
}

/// Span wrapping one administrative command.
pub fn command_span(operation: &'static str, command_id: &str) -> tracing::Span {
    tracing::info_span!(
        "command",
        op = operation,
        id = command_id,
        outcome = tracing::field::Empty,
    )
}
