use serde::{Deserialize, Serialize};

const fn default_max_connections() -> u32 {
    24
}

const fn default_connection_timeout() -> u64 {
    5
}

const fn default_recycle_timeout() -> u64 {
    2
}

/// Additional configuration options for a redis client.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct RedisConfigOptions {
    /// Maximum number of connections managed by the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds to wait for a free or newly created connection before giving up.
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Seconds to wait for an idle connection to be checked before it is handed out again.
    #[serde(default = "default_recycle_timeout")]
    pub recycle_timeout: u64,
}

impl Default for RedisConfigOptions {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            recycle_timeout: default_recycle_timeout(),
        }
    }
}

/// Configuration for connecting a redis client.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(untagged)]
pub enum RedisConfig {
    /// Connect to a Redis cluster.
    Cluster {
        /// List of `redis://` urls to use in cluster mode.
        ///
        /// This can also be a single node which is configured in cluster mode.
        cluster_nodes: Vec<String>,

        /// Additional configuration options for the redis client and a connections pool.
        #[serde(flatten)]
        options: RedisConfigOptions,
    },

    /// Connect to a single Redis instance.
    ///
    /// Contains the `redis://` url to the node.
    Single(String),

    /// Connect to a single Redis instance with pool options.
    SingleWithOpts {
        /// The `redis://` url to the node.
        server: String,

        /// Additional configuration options for the redis client and a connections pool.
        #[serde(flatten)]
        options: RedisConfigOptions,
    },
}

impl RedisConfig {
    /// Returns a configuration for a single node with default pool options.
    pub fn single(server: impl Into<String>) -> Self {
        Self::Single(server.into())
    }

    /// Returns the pool options, falling back to defaults for the plain url form.
    pub fn options(&self) -> RedisConfigOptions {
        match self {
            Self::Cluster { options, .. } | Self::SingleWithOpts { options, .. } => {
                options.clone()
            }
            Self::Single(_) => RedisConfigOptions::default(),
        }
    }
}
