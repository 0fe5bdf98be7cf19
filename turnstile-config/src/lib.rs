//! Configuration for Turnstile.
//!
//! Configuration is read from a `config.yml` file in a config folder. Every section is optional
//! and falls back to defaults. Selected values can be overridden from the command line or the
//! environment through [`OverridableConfig`].
#![warn(missing_docs)]

mod config;

pub use self::config::*;
pub use turnstile_redis::{RedisConfig, RedisConfigOptions};
