use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use turnstile_log::{LevelFilter, LogConfig};
use turnstile_quotas::{EndpointCategory, Tier, TierLimitTable, validate_user_id};
use turnstile_redis::RedisConfig;

/// Defines the source of a config error.
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    origin: ConfigErrorSource,
    kind: ConfigErrorKind,
    inner: Option<Box<dyn Error + Send + Sync>>,
}

impl ConfigError {
    #[inline]
    fn wrap<E>(inner: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            origin: ConfigErrorSource::None,
            kind,
            inner: Some(Box::new(inner)),
        }
    }

    #[inline]
    fn for_field<E>(inner: E, field: &str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(inner, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.origin = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &str) -> Self {
        self.origin = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.origin)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// A value failed validation after parsing.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ValidationError(String);

fn validate_store_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
    if timeout_ms == 0 {
        return Err(ConfigError::for_field(
            ValidationError("the store timeout must be positive".to_owned()),
            "quotas.store_timeout_ms",
        ));
    }
    Ok(())
}

enum ConfigFormat {
    Yaml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Remove all non-user permissions for the newly created file.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Overrides of configuration values from CLI parameters or environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The redis server url.
    pub redis_url: Option<String>,
    /// The store timeout in milliseconds.
    pub store_timeout_ms: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

fn default_store_timeout_ms() -> u64 {
    50
}

fn default_key_prefix() -> String {
    turnstile_quotas::DEFAULT_KEY_PREFIX.to_owned()
}

/// Quota enforcement settings.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Quotas {
    /// Deadline of a single store round trip in milliseconds.
    ///
    /// When the store does not answer in time, requests are admitted.
    pub store_timeout_ms: u64,
    /// Prefix of all counter keys.
    pub key_prefix: String,
    /// Tier assigned to users without an entry in `user_tiers`.
    pub default_tier: Tier,
    /// Tiers of individual users.
    pub user_tiers: BTreeMap<String, Tier>,
    /// Daily ceilings per tier.
    pub tiers: TierLimitTable,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            key_prefix: default_key_prefix(),
            default_tier: Tier::default(),
            user_tiers: BTreeMap::new(),
            tiers: TierLimitTable::default(),
        }
    }
}

fn default_metrics_prefix() -> String {
    "turnstile".to_owned()
}

/// Controls internal reporting to statsd.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Metrics {
    /// Address of a statsd server to send metrics to. Metrics are disabled when unset.
    pub statsd: Option<String>,
    /// Prefix of all metric names.
    pub prefix: String,
    /// Tags added to every metric.
    pub default_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: default_metrics_prefix(),
            default_tags: BTreeMap::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    redis: Option<RedisConfig>,
    quotas: Quotas,
    logging: LogConfig,
    metrics: Metrics,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Minimal version of a config for dumping out.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct MinimalConfig {
    /// The redis server to store counters in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
}

impl MinimalConfig {
    /// Saves the config in the given config folder as config.yml.
    pub fn save_in_folder<P: AsRef<Path>>(&self, p: P) -> Result<(), ConfigError> {
        let path = p.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.save(path)
    }
}

impl ConfigObject for MinimalConfig {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Config struct.
#[derive(Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let config = Config {
            values: ConfigValues::load(&path)?,
            path: path.clone(),
        };

        config
            .validate()
            .map_err(|e| e.file(ConfigValues::path(&path)))?;

        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        let config = Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        // A failed override must leave the config untouched.
        let store_timeout_ms = overrides
            .store_timeout_ms
            .map(|timeout| timeout.parse::<u64>())
            .transpose()
            .map_err(|err| ConfigError::for_field(err, "store_timeout_ms"))?;

        if let Some(timeout) = store_timeout_ms {
            validate_store_timeout(timeout)?;
        }

        let log_level = overrides
            .log_level
            .map(|level| level.parse::<LevelFilter>())
            .transpose()
            .map_err(|err| ConfigError::for_field(err, "log_level"))?;

        if let Some(redis) = overrides.redis_url {
            self.values.redis = Some(RedisConfig::Single(redis));
        }
        if let Some(timeout) = store_timeout_ms {
            self.values.quotas.store_timeout_ms = timeout;
        }
        if let Some(level) = log_level {
            self.values.logging.level = level;
        }

        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let quotas = &self.values.quotas;

        validate_store_timeout(quotas.store_timeout_ms)?;

        for (tier, limits) in quotas.tiers.all_tier_limits() {
            let unreachable = EndpointCategory::CONCRETE
                .into_iter()
                .find(|category| !limits.get(*category).is_zero());

            if let Some(category) = unreachable
                && limits.total().is_zero()
            {
                return Err(ConfigError::for_field(
                    ValidationError(format!(
                        "a zero total blocks `{category}` although it has a ceiling"
                    )),
                    &format!("quotas.tiers.{tier}.total"),
                ));
            }
        }

        for user_id in quotas.user_tiers.keys() {
            validate_user_id(user_id)
                .map_err(|err| ConfigError::for_field(err, "quotas.user_tiers"))?;
        }

        Ok(())
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the folder the config was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the redis configuration, if counters are kept in redis.
    pub fn redis(&self) -> Option<&RedisConfig> {
        self.values.redis.as_ref()
    }

    /// Returns the deadline of a single store round trip.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.values.quotas.store_timeout_ms)
    }

    /// Returns the prefix of all counter keys.
    pub fn key_prefix(&self) -> &str {
        &self.values.quotas.key_prefix
    }

    /// Returns the tier of users without an explicit assignment.
    pub fn default_tier(&self) -> Tier {
        self.values.quotas.default_tier
    }

    /// Returns the tiers of individual users.
    pub fn user_tiers(&self) -> &BTreeMap<String, Tier> {
        &self.values.quotas.user_tiers
    }

    /// Returns the tier of the given user.
    pub fn tier_of(&self, user_id: &str) -> Tier {
        self.user_tiers()
            .get(user_id)
            .copied()
            .unwrap_or_else(|| self.default_tier())
    }

    /// Returns the daily ceilings per tier.
    pub fn tier_limits(&self) -> &TierLimitTable {
        &self.values.quotas.tiers
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the address of the statsd server, if metrics are enabled.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix of all metric names.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the tags added to every metric.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }
}
