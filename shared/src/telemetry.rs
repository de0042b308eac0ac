use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

const FALLBACK_FILTER: &str = "info";

/// `RUST_LOG` wins over the configured default filter.
fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured_filter(&config.default_filter))
}

fn configured_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Installs the global subscriber. Returns `false` if one was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        let config = TelemetryConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn invalid_filter_falls_back() {
        assert_eq!(configured_filter("tripdesk_shared=loud").to_string(), FALLBACK_FILTER);
    }

    #[test]
    fn configured_filter_is_used_when_valid() {
        assert_eq!(
            configured_filter("tripdesk_shared=debug").to_string(),
            "tripdesk_shared=debug"
        );
    }
}
