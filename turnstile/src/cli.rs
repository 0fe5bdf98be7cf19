use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::ArgMatches;
use serde::Serialize;
use turnstile_config::{Config, MinimalConfig, OverridableConfig, RedisConfig};
use turnstile_quotas::{
    EndpointCategory, MemoryQuotaStore, QuotaDecision, QuotaEnforcer, QuotaKeySpace, QuotaStore,
    RedisQuotaStore, StaticTierResolver, Tier, TierResolver, classify_endpoint,
};
use turnstile_redis::AsyncRedisClient;

use crate::cliapp::make_app;
use crate::setup;

/// Exit status of `check` if the request is denied.
const EXIT_DENIED: i32 = 2;

/// Default config folder, relative to the working directory.
const DEFAULT_CONFIG_DIR: &str = ".turnstile";

/// Runs the command line application and returns the exit status.
pub fn execute() -> Result<i32> {
    let app = make_app();
    let matches = app.get_matches();

    let config_path = matches
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));

    // `config init` runs before loading, since there is nothing to load yet.
    if let Some(("config", config_matches)) = matches.subcommand()
        && let Some(("init", _)) = config_matches.subcommand()
    {
        return init_config(&config_path, &matches).map(|()| 0);
    }

    let mut config = if Config::config_exists(&config_path) {
        Config::from_path(&config_path)?
    } else {
        Config::default()
    };
    config.apply_override(extract_config_args(&matches))?;

    turnstile_log::init(config.logging());
    setup::init_metrics(&config)?;

    if let Some(("config", config_matches)) = matches.subcommand() {
        return manage_config(&config, config_matches).map(|()| 0);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not create the tokio runtime")?;

    match select_store(&config, &matches) {
        Some(redis) => {
            setup::dump_spawn_infos(&config, "redis");
            let client = AsyncRedisClient::from_config(redis)?;
            runtime.block_on(run_command(RedisQuotaStore::new(client), &config, &matches))
        }
        None => {
            setup::dump_spawn_infos(&config, "memory");
            runtime.block_on(run_command(MemoryQuotaStore::new(), &config, &matches))
        }
    }
}

/// Extract config arguments from a parsed command line arguments object.
pub fn extract_config_args(matches: &ArgMatches) -> OverridableConfig {
    OverridableConfig {
        redis_url: matches.get_one("redis_url").cloned(),
        store_timeout_ms: matches.get_one("store_timeout_ms").cloned(),
        log_level: matches.get_one("log_level").cloned(),
    }
}

/// Returns the redis config to use, or `None` for the in-memory store.
fn select_store<'a>(config: &'a Config, matches: &ArgMatches) -> Option<&'a RedisConfig> {
    if matches.get_flag("memory") {
        return None;
    }
    config.redis()
}

async fn run_command<S: QuotaStore>(
    store: S,
    config: &Config,
    matches: &ArgMatches,
) -> Result<i32> {
    let enforcer = QuotaEnforcer::new(store, config.tier_limits().clone())
        .key_space(QuotaKeySpace::new(config.key_prefix()))
        .timeout(config.store_timeout());

    let resolver =
        StaticTierResolver::new(config.default_tier()).with_users(config.user_tiers().clone());

    match matches.subcommand() {
        Some(("check", matches)) => check(&enforcer, &resolver, matches).await,
        Some(("usage", matches)) => usage(&enforcer, &resolver, matches).await,
        Some(("reset", matches)) => reset(&enforcer, matches).await,
        Some(("limits", matches)) => limits(&enforcer, matches),
        Some((name, _)) => Err(anyhow!("unknown command `{name}`")),
        None => Err(anyhow!("no command given")),
    }
}

#[derive(Serialize)]
struct CheckOutput<'a> {
    user: &'a str,
    tier: Tier,
    #[serde(flatten)]
    decision: &'a QuotaDecision,
    headers: BTreeMap<String, String>,
}

async fn check<S: QuotaStore>(
    enforcer: &QuotaEnforcer<S>,
    resolver: &impl TierResolver,
    matches: &ArgMatches,
) -> Result<i32> {
    let user = required_user(matches)?;
    let tier = resolve_tier(resolver, user, matches).await?;

    let category = match parse_category(matches)? {
        Some(category) => category,
        None => {
            let path = matches
                .get_one::<String>("path")
                .ok_or_else(|| anyhow!("either --path or --category is required"))?;
            classify_endpoint(path)
        }
    };

    let decision = if matches.get_flag("read_only") {
        enforcer.check_only(user, tier, category).await?
    } else {
        enforcer.check_and_increment(user, tier, category).await?
    };

    let headers = decision
        .headers()
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or_default().to_owned();
            (name.as_str().to_owned(), value)
        })
        .collect();

    print_json(&CheckOutput {
        user,
        tier,
        decision: &decision,
        headers,
    })?;

    Ok(if decision.allowed { 0 } else { EXIT_DENIED })
}

async fn usage<S: QuotaStore>(
    enforcer: &QuotaEnforcer<S>,
    resolver: &impl TierResolver,
    matches: &ArgMatches,
) -> Result<i32> {
    let user = required_user(matches)?;
    let tier = resolve_tier(resolver, user, matches).await?;
    let snapshot = enforcer.admin().usage_snapshot(user, tier).await?;

    print_json(&serde_json::json!({
        "user": user,
        "tier": tier,
        "usage": snapshot,
    }))?;

    Ok(0)
}

async fn reset<S: QuotaStore>(enforcer: &QuotaEnforcer<S>, matches: &ArgMatches) -> Result<i32> {
    let user = required_user(matches)?;
    let category = parse_category(matches)?;

    if category.is_none() && !matches.get_flag("yes") {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(format!("Reset all of today's counters of {user}?"))
            .default(false)
            .interact()?;

        if !confirmed {
            turnstile_log::info!("reset aborted");
            return Ok(1);
        }
    }

    let deleted = enforcer.admin().reset(user, category).await?;
    print_json(&serde_json::json!({
        "user": user,
        "category": category.map_or("all", EndpointCategory::name),
        "deleted": deleted,
    }))?;

    Ok(0)
}

fn limits<S: QuotaStore>(enforcer: &QuotaEnforcer<S>, matches: &ArgMatches) -> Result<i32> {
    let admin = enforcer.admin();

    match parse_tier(matches)? {
        Some(tier) => print_json(admin.limits_for(tier))?,
        None => print_json(&admin.all_tier_limits())?,
    }

    Ok(0)
}

fn required_user(matches: &ArgMatches) -> Result<&str> {
    matches
        .get_one::<String>("user")
        .map(String::as_str)
        .ok_or_else(|| anyhow!("--user is required"))
}

fn parse_tier(matches: &ArgMatches) -> Result<Option<Tier>> {
    matches
        .get_one::<String>("tier")
        .map(|tier| tier.parse::<Tier>())
        .transpose()
        .context("invalid --tier")
}

fn parse_category(matches: &ArgMatches) -> Result<Option<EndpointCategory>> {
    matches
        .get_one::<String>("category")
        .map(|category| category.parse::<EndpointCategory>())
        .transpose()
        .context("invalid --category")
}

async fn resolve_tier(
    resolver: &impl TierResolver,
    user: &str,
    matches: &ArgMatches,
) -> Result<Tier> {
    Ok(match parse_tier(matches)? {
        Some(tier) => tier,
        None => resolver.resolve_user_tier(user).await,
    })
}

#[allow(clippy::print_stdout)]
fn print_json(value: &(impl Serialize + ?Sized)) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a minimal config into the folder, prompting for the redis server if interactive.
fn init_config(config_path: &Path, matches: &ArgMatches) -> Result<()> {
    turnstile_log::init(&Default::default());

    if Config::config_exists(config_path) {
        turnstile_log::info!(
            "there is already a config in {}, nothing to do",
            config_path.display()
        );
        return Ok(());
    }

    let redis_url = match matches.get_one::<String>("redis_url") {
        Some(url) => url.clone(),
        None if dialoguer::console::user_attended() => dialoguer::Input::<String>::new()
            .with_prompt("Redis URL (leave empty to count in memory)")
            .allow_empty(true)
            .interact_text()?,
        None => String::new(),
    };

    let config = MinimalConfig {
        redis: (!redis_url.is_empty()).then(|| RedisConfig::single(redis_url)),
    };
    config.save_in_folder(config_path)?;

    turnstile_log::info!("all done, config written to {}", config_path.display());
    Ok(())
}

fn manage_config(config: &Config, matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", matches)) => {
            match matches.get_one::<String>("format").map(String::as_str) {
                Some("debug") => print_debug(config),
                _ => print_yaml(&config.to_yaml_string()?),
            }
            Ok(())
        }
        _ => Err(anyhow!("unknown config command")),
    }
}

#[allow(clippy::print_stdout)]
fn print_debug(config: &Config) {
    println!("{config:#?}");
}

#[allow(clippy::print_stdout)]
fn print_yaml(yaml: &str) {
    print!("{yaml}");
}
