//! Command line interface of Turnstile.
//!
//! Turnstile enforces daily request quotas per user, subscription tier and endpoint category. The
//! counters live in Redis, so every process that points at the same server shares the same budget.
//! Without Redis, counters are kept in memory for the lifetime of one command.
//!
//! # Commands
//!
//!  - `check`: Counts a request and reports whether it is allowed. Exits with status 2 on denial.
//!  - `usage`: Shows today's usage of every category of a user.
//!  - `reset`: Deletes today's counters of a user.
//!  - `limits`: Prints the configured ceilings.
//!  - `config init|show`: Writes or prints the configuration.
//!
//! # Workspace Crates
//!
//!  - `turnstile`: Main entry point and command line interface.
//!  - [`turnstile-config`]: Static configuration for the CLI.
//!  - [`turnstile-log`]: Logging facade.
//!  - [`turnstile-quotas`]: Categories, tiers, counters and the enforcer.
//!  - [`turnstile-redis`]: Pooled Redis and Redis Cluster abstraction.
//!  - [`turnstile-statsd`]: StatsD client for internal measurements.
//!
//! [`turnstile-config`]: ../turnstile_config/index.html
//! [`turnstile-log`]: ../turnstile_log/index.html
//! [`turnstile-quotas`]: ../turnstile_quotas/index.html
//! [`turnstile-redis`]: ../turnstile_redis/index.html
//! [`turnstile-statsd`]: ../turnstile_statsd/index.html

mod cli;
mod cliapp;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(code) => code,
        Err(err) => {
            turnstile_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
