//! Logging initialization.

use anyhow::Result;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let writer = || match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let json_layer = (config.format == "json").then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_writer(writer())
    });
    let text_layer = (config.format != "json").then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(writer())
    });

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!(format = %config.format, output = %config.output, "Logging initialized");
    Ok(())
}
