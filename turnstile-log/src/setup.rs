use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::{LogConfig, LogFormat};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Builds the default filter directives for all of Turnstile's crates.
///
/// Third-party crates log at `INFO`, workspace crates at the configured level.
fn default_filter(level: LevelFilter) -> EnvFilter {
    let mut filter = EnvFilter::new(LevelFilter::INFO.min(level).to_string());

    // The redis client is noisy on reconnects and logs those on `INFO` already.
    if let Ok(directive) = "redis=warn".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}={level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    filter
}

/// Initialize the logging system.
///
/// The log filter can be overridden with the `RUST_LOG` environment variable. Calling this more
/// than once has no effect.
///
/// # Example
///
/// ```
/// let log_config = turnstile_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// turnstile_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: Logging is initialized during startup, before any other threads are spawned.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) if !value.is_empty() => EnvFilter::new(value),
        _ => default_filter(config.level),
    };

    let subscriber = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let format_layer = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            subscriber.compact().with_ansi(true).without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format_layer.with_filter(filter))
        .try_init()
        .ok();
}
