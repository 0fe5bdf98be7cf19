use anyhow::Result;
use turnstile_config::Config;
use turnstile_statsd::MetricsConfig;

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config, backend: &str) {
    if config.path().as_os_str().is_empty() {
        turnstile_log::info!("running turnstile without config folder");
    } else {
        turnstile_log::info!(
            "running turnstile from config folder {}",
            config.path().display()
        );
    }
    turnstile_log::info!("  store: {backend}");
    turnstile_log::info!("  store timeout: {:?}", config.store_timeout());
    turnstile_log::info!("  key prefix: {}", config.key_prefix());
    turnstile_log::info!("  default tier: {}", config.default_tier());
    turnstile_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    turnstile_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        default_tags: config.metrics_default_tags().clone(),
    })?;

    Ok(())
}
