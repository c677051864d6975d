use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingSection;

/// Pick the filter directives: `RUST_LOG` wins, then `--verbose`, then the
/// configured filter.
pub fn filter_directives(config: &LoggingSection, verbose: bool, rust_log: Option<&str>) -> String {
    match rust_log {
        Some(directives) if !directives.trim().is_empty() => directives.to_string(),
        _ if verbose => "corkboard=debug,tower_http=debug".to_string(),
        _ => config.filter.clone(),
    }
}

/// Install the global tracing subscriber.
///
/// Logs go to stderr so command output on stdout stays clean. Calling this
/// twice returns an error instead of replacing the first subscriber.
pub fn init(
    config: &LoggingSection,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let directives = filter_directives(config, verbose, rust_log.as_deref());
    let filter_layer = EnvFilter::try_new(&directives).or_else(|_| EnvFilter::try_new("info"))?;

    let registry = tracing_subscriber::registry().with(filter_layer);
    if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn test_rust_log_takes_precedence() {
        let config = LoggingSection::default();
        assert_eq!(filter_directives(&config, true, Some("trace")), "trace");
    }

    #[test]
    fn test_blank_rust_log_is_ignored() {
        let config = LoggingSection::default();
        assert_eq!(
            filter_directives(&config, false, Some("  ")),
            "corkboard=info,tower_http=info"
        );
    }

    #[test]
    fn test_verbose_raises_level() {
        let config = LoggingSection::default();
        assert_eq!(
            filter_directives(&config, true, None),
            "corkboard=debug,tower_http=debug"
        );
    }

    #[test]
    fn test_configured_filter_is_default() {
        let config = LoggingSection {
            filter: "warn".to_string(),
            json: false,
        };
        assert_eq!(filter_directives(&config, false, None), "warn");
    }

    #[test]
    fn test_logging_init() {
        // Only one subscriber per process; a second init just errors.
        let _ = init(&LoggingSection::default(), false);

        info!("This is an info message");
        warn!("This is a warning message");
    }
}
