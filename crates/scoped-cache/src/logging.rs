use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::{MakeWriter, fmt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, Logging};

/// Installs the global log subscriber, writing to stderr.
pub fn init_logging(config: &Logging) {
    init_logging_with_writer(config, std::io::stderr);
}

/// Installs the global log subscriber with a custom writer.
///
/// Does nothing if a global subscriber was already installed.
pub fn init_logging_with_writer<W>(config: &Logging, make_writer: W)
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let subscriber = fmt()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_env_filter(config.level.as_str())
        .with_writer(make_writer);

    let result = match config.format {
        LogFormat::Pretty => subscriber.pretty().finish().try_init(),
        LogFormat::Json => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_file(true)
            .with_line_number(true)
            .finish()
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("a global log subscriber was already installed");
    }
}
