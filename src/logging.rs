use crate::error::{Error, Result};
use tracing::Level;
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Install the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn init_logging(level: Level, json_output: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pop_partition={},warn", level)));

    let installed = if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_thread_names(true);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(false)
            .with_thread_names(false);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    };
    installed.map_err(|e| Error::Config(format!("logging already initialised: {}", e)))
}

/// Parse a `--log-level` value.
pub fn parse_level(value: &str) -> Result<Level> {
    value
        .parse::<Level>()
        .map_err(|_| Error::Config(format!("unknown log level '{}'", value)))
}

/// Log the completion of a pipeline stage with its wall-clock time.
#[macro_export]
macro_rules! log_stage {
    ($stage:expr, $started:expr) => {
        tracing::info!(
            stage = $stage,
            elapsed_ms = $started.elapsed().as_millis() as u64,
            "Stage complete"
        )
    };
    ($stage:expr, $started:expr, $($field:tt)+) => {
        tracing::info!(
            stage = $stage,
            elapsed_ms = $started.elapsed().as_millis() as u64,
            $($field)+,
            "Stage complete"
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("INFO").unwrap(), Level::INFO);
        assert!(matches!(parse_level("loud"), Err(Error::Config(_))));
    }
}
