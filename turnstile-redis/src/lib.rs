//! Abstraction over Redis for the quota counters.
//!
//! This crate wraps `deadpool-redis` connection pools for single instances and Redis Cluster
//! deployments behind [`AsyncRedisClient`], and ships the Lua scripts that implement the atomic
//! counter operations in [`RedisScripts`].
#![warn(missing_docs)]

mod config;
mod real;
mod scripts;

pub use self::config::*;
pub use self::real::*;
pub use self::scripts::*;
