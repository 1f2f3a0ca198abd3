//! Logging initialization and configuration.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Fails if a subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.level)));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_target(true);
            subscriber.with(json_layer).try_init()
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true);
            subscriber.with(pretty_layer).try_init()
        }
    }
}

/// Configured level for our crates; noisy dependencies stay at warn.
fn filter_directive(level: &str) -> String {
    format!("{level},hyper=warn,reqwest=warn,h2=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_quiets_http_stack() {
        let directive = filter_directive("debug");
        assert!(directive.starts_with("debug,"));
        assert!(directive.contains("hyper=warn"));
        assert!(EnvFilter::try_new(&directive).is_ok());
    }
}
