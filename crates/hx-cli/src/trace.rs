use std::io::IsTerminal;
use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use hx_config::{LogFormat, LoggingConfig};

/// Initialize the global tracing subscriber from the `[logging]` section.
///
/// Returns the non-blocking writer guard when logging to a file; the caller
/// must keep it alive for the process lifetime or buffered lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut filter = EnvFilter::try_new(&config.level)?;
    for (module, level) in &config.modules {
        let directive: Directive = format!("{module}={level}").parse()?;
        filter = filter.add_directive(directive);
    }
    let registry = tracing_subscriber::registry().with(filter);

    match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().map(Path::new).unwrap_or(Path::new("helios.log"));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            match config.format {
                LogFormat::Json => registry.with(layer.json()).init(),
                LogFormat::Plain => registry.with(layer).init(),
            }
            Ok(Some(guard))
        }
        None => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal());
            match config.format {
                LogFormat::Json => registry.with(layer.json()).init(),
                LogFormat::Plain => registry.with(layer).init(),
            }
            Ok(None)
        }
    }
}
