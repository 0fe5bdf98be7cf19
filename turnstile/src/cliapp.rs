//! This module implements the definition of the command line app.
//!
//! It does not import any workspace crates, so tiers and categories are listed as plain strings.

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgGroup, Command, ValueHint, value_parser};

const TIERS: [&str; 3] = ["free", "pro", "enterprise"];
const CATEGORIES: [&str; 4] = ["analytics", "api", "admin", "public"];

pub fn make_app() -> Command {
    Command::new("turnstile")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Daily request quotas per user, tier and endpoint category.")
        .after_help(
            "All commands read and write the shared counters. Without a configured redis server, \
             counters live in memory and vanish when the command exits.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("CONFIG")
                .value_hint(ValueHint::DirPath)
                .value_parser(value_parser!(PathBuf))
                .env("TURNSTILE_CONFIG")
                .help("The path to the config folder."),
        )
        .arg(
            Arg::new("redis_url")
                .long("redis-url")
                .global(true)
                .value_name("URL")
                .env("TURNSTILE_REDIS_URL")
                .help("Redis server URL, overrides the configured redis."),
        )
        .arg(
            Arg::new("store_timeout_ms")
                .long("store-timeout-ms")
                .global(true)
                .value_name("MILLIS")
                .env("TURNSTILE_STORE_TIMEOUT_MS")
                .help("Deadline of one store round trip in milliseconds."),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .global(true)
                .value_name("LEVEL")
                .env("TURNSTILE_LOG_LEVEL")
                .help("The log level: off, error, warn, info, debug or trace."),
        )
        .arg(
            Arg::new("memory")
                .long("memory")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Keep counters in memory, even if redis is configured."),
        )
        .subcommand(
            Command::new("check")
                .about("Check a request against its quota")
                .after_help(
                    "This counts the request unless --read-only is given. The exit status is 2 \
                     if the request is denied. The decision and its response headers are \
                     printed as JSON.",
                )
                .arg(user_arg())
                .arg(
                    Arg::new("path")
                        .long("path")
                        .value_name("PATH")
                        .help("Request path, classified into an endpoint category."),
                )
                .arg(category_arg().help("Endpoint category, instead of a path."))
                .group(
                    ArgGroup::new("endpoint")
                        .args(["path", "category"])
                        .required(true),
                )
                .arg(tier_arg())
                .arg(
                    Arg::new("read_only")
                        .long("read-only")
                        .action(ArgAction::SetTrue)
                        .help("Report the decision without counting the request."),
                ),
        )
        .subcommand(
            Command::new("usage")
                .about("Show today's usage of a user")
                .arg(user_arg())
                .arg(tier_arg()),
        )
        .subcommand(
            Command::new("reset")
                .about("Reset today's counters of a user")
                .after_help(
                    "Without --category, all of the user's counters for today are deleted, \
                     including the total. Resetting a single category leaves the total as is.",
                )
                .arg(user_arg())
                .arg(category_arg().help("Only reset this category."))
                .arg(
                    Arg::new("yes")
                        .long("yes")
                        .short('y')
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation."),
                ),
        )
        .subcommand(
            Command::new("limits")
                .about("Show the configured daily ceilings")
                .arg(tier_arg().help("Only show this tier.")),
        )
        .subcommand(
            Command::new("config")
                .about("Manage the turnstile config")
                .after_help(
                    "This command provides basic config management. It can be used primarily to \
                     initialize a new config file for turnstile.",
                )
                .subcommand_required(true)
                .subcommand(
                    Command::new("init").about("Initialize a new turnstile config"),
                )
                .subcommand(
                    Command::new("show").about("Show the entire config").arg(
                        Arg::new("format")
                            .short('f')
                            .long("format")
                            .default_value("yaml")
                            .value_parser(["debug", "yaml"])
                            .help("The output format"),
                    ),
                ),
        )
}

fn user_arg() -> Arg {
    Arg::new("user")
        .long("user")
        .short('u')
        .value_name("USER_ID")
        .required(true)
        .help("The id of the user.")
}

fn tier_arg() -> Arg {
    Arg::new("tier")
        .long("tier")
        .short('t')
        .value_parser(PossibleValuesParser::new(TIERS))
        .help("Subscription tier, instead of the configured one.")
}

fn category_arg() -> Arg {
    Arg::new("category")
        .long("category")
        .value_parser(PossibleValuesParser::new(CATEGORIES))
}
