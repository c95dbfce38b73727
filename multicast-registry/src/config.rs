//! Per-namespace configuration, loadable from JSON5.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backend::key_value_store::DEFAULT_KEY_PREFIX;
use crate::backend::memory_messaging::{DEFAULT_MAILBOX_CAPACITY, DEFAULT_TOPIC_PREFIX};
use crate::data_plane::DeliverySemantics;
use crate::error::RegistryError;
use crate::filter::{FilterLimits, DEFAULT_MAX_FILTER_CLAUSES, DEFAULT_MAX_FILTER_DEPTH};
use crate::runtime::retry::RetryPolicy;
use crate::schema::IdentitySchema;

/// Everything one registry namespace needs.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NamespaceConfig {
    pub name: String,
    #[serde(default)]
    pub identity_schema: Option<IdentitySchema>,
    #[serde(default)]
    pub backend_slots: BackendSlotsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// TTL applied when a registration does not carry one. Unset means no expiry.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default)]
    pub filter_evaluation: FilterEvaluation,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub store_retry: RetryPolicy,
    #[serde(default)]
    pub redelivery: RedeliveryConfig,
    /// Page size used when the engine walks the whole store.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

fn default_scan_page_size() -> usize {
    500
}

impl NamespaceConfig {
    /// Defaults throughout: in-memory slots, no schema, no quota.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity_schema: None,
            backend_slots: BackendSlotsConfig::default(),
            limits: LimitsConfig::default(),
            default_ttl_secs: None,
            filter_evaluation: FilterEvaluation::default(),
            sweeper: SweeperConfig::default(),
            delivery: DeliveryConfig::default(),
            store_retry: RetryPolicy::default(),
            redelivery: RedeliveryConfig::default(),
            scan_page_size: default_scan_page_size(),
        }
    }

    pub fn from_json5_str(contents: &str) -> Result<Self, RegistryError> {
        let config: Self = json5::from_str(contents).map_err(|err| {
            RegistryError::invalid_configuration(format!("unable to parse namespace config: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            RegistryError::invalid_configuration(format!(
                "unable to read config file {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json5_str(&contents)
    }

    /// Rejects values no namespace can run with.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::invalid_configuration("namespace name is empty"));
        }
        if self.limits.max_filter_depth == 0 || self.limits.max_filter_clauses == 0 {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': filter limits must be positive",
                self.name
            )));
        }
        if self.default_ttl_secs == Some(0) {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': default_ttl_secs must be positive",
                self.name
            )));
        }
        if self.sweeper.interval_ms == 0 || self.sweeper.batch_size == 0 {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': sweeper interval and batch size must be positive",
                self.name
            )));
        }
        if self.delivery.max_concurrency == 0 || self.delivery.default_timeout_ms == 0 {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': delivery concurrency and timeout must be positive",
                self.name
            )));
        }
        if self.scan_page_size == 0 {
            return Err(RegistryError::invalid_configuration(format!(
                "namespace '{}': scan_page_size must be positive",
                self.name
            )));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

/// Which binding fills each backend slot.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BackendSlotsConfig {
    #[serde(default)]
    pub registry: RegistryStoreConfig,
    #[serde(default)]
    pub messaging: MessagingSinkConfig,
    #[serde(default)]
    pub durability: Option<DurabilitySinkConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryStoreConfig {
    #[default]
    Memory,
    KeyValue {
        #[serde(default = "default_key_prefix")]
        prefix: String,
    },
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagingSinkConfig {
    Memory {
        #[serde(default = "default_topic_prefix")]
        topic_prefix: String,
        #[serde(default)]
        require_subscription: bool,
        #[serde(default = "default_mailbox_capacity")]
        mailbox_capacity: usize,
    },
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

impl Default for MessagingSinkConfig {
    fn default() -> Self {
        MessagingSinkConfig::Memory {
            topic_prefix: default_topic_prefix(),
            require_subscription: false,
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DurabilitySinkConfig {
    Memory {
        #[serde(default = "default_lease_ms")]
        lease_ms: u64,
    },
}

fn default_lease_ms() -> u64 {
    30_000
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    #[serde(default = "default_max_filter_depth")]
    pub max_filter_depth: usize,
    #[serde(default = "default_max_filter_clauses")]
    pub max_filter_clauses: usize,
    /// Registration quota; `0` is unlimited.
    #[serde(default)]
    pub max_identities: usize,
}

fn default_max_filter_depth() -> usize {
    DEFAULT_MAX_FILTER_DEPTH
}

fn default_max_filter_clauses() -> usize {
    DEFAULT_MAX_FILTER_CLAUSES
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_filter_depth: DEFAULT_MAX_FILTER_DEPTH,
            max_filter_clauses: DEFAULT_MAX_FILTER_CLAUSES,
            max_identities: 0,
        }
    }
}

impl LimitsConfig {
    pub fn filter_limits(&self) -> FilterLimits {
        FilterLimits {
            max_filter_depth: self.max_filter_depth,
            max_filter_clauses: self.max_filter_clauses,
        }
    }
}

/// Where filters are evaluated.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FilterEvaluation {
    /// Push filters into stores that evaluate natively, post-filter otherwise.
    #[default]
    Auto,
    /// Always full-scan and evaluate in-process.
    EngineSide,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: usize,
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_sweep_batch_size() -> usize {
    256
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_sweep_interval_ms(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub default_semantics: DeliverySemantics,
    /// In-request attempts per target under at-least-once and exactly-once.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_concurrency() -> usize {
    64
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_semantics: DeliverySemantics::default(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            default_timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RedeliveryConfig {
    #[serde(default = "default_redelivery_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_redelivery_batch_size")]
    pub batch_size: usize,
    /// Entries are dropped once they have been attempted this many times.
    #[serde(default = "default_redelivery_max_attempts")]
    pub max_attempts: u32,
}

fn default_redelivery_interval_ms() -> u64 {
    1_000
}

fn default_redelivery_batch_size() -> usize {
    128
}

fn default_redelivery_max_attempts() -> u32 {
    10
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_redelivery_interval_ms(),
            batch_size: default_redelivery_batch_size(),
            max_attempts: default_redelivery_max_attempts(),
        }
    }
}
