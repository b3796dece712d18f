//! Structured logging for the Nebula lightmap baker.
//!
//! Provides span-based, filterable logging via the `tracing` ecosystem.
//! Console output carries uptime timestamps, module paths and thread names,
//! so per-stage bake workers are easy to tell apart. Debug builds can also
//! write JSON logs to a file for post-mortem analysis of long bakes.

use nebula_config::Config;
use std::path::Path;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config provide one.
pub const DEFAULT_FILTER: &str = "info,rayon=warn";

/// Initialize the global tracing subscriber.
///
/// * `log_dir` - Directory for the JSON log file (debug builds only)
/// * `debug_build` - Whether file logging may be enabled at all
/// * `config` - Optional configuration providing the level and file switch
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once keeps the first subscriber.
///
/// ```no_run
/// use nebula_config::Config;
/// use nebula_log::init_logging;
///
/// let config = Config::default();
/// init_logging(Some(std::path::Path::new("./logs")), true, Some(&config));
/// ```
pub fn init_logging(log_dir: Option<&Path>, debug_build: bool, config: Option<&Config>) {
    let filter_str = config
        .map(|c| c.log.level.as_str())
        .filter(|level| !level.is_empty())
        .unwrap_or(DEFAULT_FILTER);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true) // texel workers are named
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let json_enabled = config.is_some_and(|c| c.log.json_file);
    if debug_build
        && json_enabled
        && let Some(log_dir) = log_dir
        && std::fs::create_dir_all(log_dir).is_ok()
        && let Ok(log_file) = std::fs::File::create(log_dir.join("lightmap-bake.log"))
    {
        let _ = subscriber.with(json_file_layer(log_file)).try_init();
        return;
    }

    let _ = subscriber.try_init();
}

/// JSON layer writing one event per line to `file`.
pub fn json_file_layer<S>(file: std::fs::File) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_timer(fmt::time::uptime())
        .json()
}

/// `EnvFilter` built from [`DEFAULT_FILTER`].
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        let filter_str = format!("{}", default_env_filter());
        assert!(filter_str.contains("info"));
        assert!(filter_str.contains("rayon=warn"));
    }

    #[test]
    fn test_subsystem_filter() {
        let filter = EnvFilter::new("info,nebula_lightmap=debug");
        assert!(format!("{}", filter).contains("nebula_lightmap=debug"));
    }

    #[test]
    fn test_configured_levels_parse() {
        let mut config = Config::default();
        for level in [
            "debug,nebula_lightmap=trace",
            "warn,nebula_lightmap::scheduler=debug",
            DEFAULT_FILTER,
        ] {
            config.log.level = level.to_string();
            assert!(
                EnvFilter::try_new(&config.log.level).is_ok(),
                "unparseable level {level}"
            );
        }
    }

    #[test]
    fn test_json_layer_writes_structured_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lightmap-bake.log");
        let file = std::fs::File::create(&path).unwrap();

        let subscriber = tracing_subscriber::registry().with(json_file_layer(file));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(map = 3, "direct lighting done");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents.lines().next().expect("one JSON event");
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "direct lighting done");
        assert_eq!(value["fields"]["map"], 3);
        assert_eq!(value["level"], "INFO");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let config = Config::default();
        init_logging(None, false, Some(&config));
        init_logging(None, false, None);
    }
}
