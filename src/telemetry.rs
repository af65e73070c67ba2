use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Nip46Config;

// Global one-time initialization for the logging backend
static INIT: Once = Once::new();

pub fn init(level: Level) {
    install(level, None);
}

/// Same as `init`, but names the component in the startup line.
pub fn init_with_component(level: Level, component: &str) {
    install(level, Some(component));
}

pub fn init_from_config(cfg: &Nip46Config) {
    init(parse_level(&cfg.log_level));
}

fn install(level: Level, component: Option<&str>) {
    INIT.call_once(|| {
        // RUST_LOG wins over the programmatic level
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

        let result = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init();

        if result.is_err() {
            // Someone else owns the global subscriber
            return;
        }

        match component {
            Some(component) => tracing::info!(
                "Tracing initialized at level = {} (component={})",
                level,
                component
            ),
            None => tracing::info!("Tracing initialized at level = {}", level),
        }
    });
}

pub fn parse_level(s: &str) -> Level {
    match s.to_ascii_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" | "warning" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("WARNING"), Level::WARN);
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(Level::DEBUG);
        init_with_component(Level::ERROR, "nip46");
    }
}
