//! Queue configuration and handler secrets.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::QueueError;

pub const DEFAULT_DEPLOYMENT_KEY: &str = "default";
pub const DEFAULT_LARGE_PAYLOAD_KB: usize = 100;

/// Budget for one batch quantum and the delay before the next one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Wall-clock time one quantum may spend on items.
    pub quantum: Duration,
    /// Optional cap on items per quantum.
    pub max_items_per_quantum: Option<usize>,
    /// How far in the future the follow-up wake-up is scheduled.
    pub wake_up_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            quantum: Duration::from_millis(25_000),
            max_items_per_quantum: None,
            wake_up_delay: Duration::from_millis(1_000),
        }
    }
}

impl BatchConfig {
    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items_per_quantum = Some(max_items);
        self
    }

    pub fn with_wake_up_delay(mut self, delay: Duration) -> Self {
        self.wake_up_delay = delay;
        self
    }
}

/// Configuration for one queue actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Names the actor instance. Scopes its database and blob prefix.
    pub deployment_key: String,
    /// Payloads larger than this many KB are tiered to the blob store.
    pub large_payload_kb: usize,
    pub batch: BatchConfig,
    /// Timeout for client calls into the actor.
    pub call_timeout: Duration,
    /// Delay before a job that hit a store outage is re-queued.
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            deployment_key: DEFAULT_DEPLOYMENT_KEY.to_string(),
            large_payload_kb: DEFAULT_LARGE_PAYLOAD_KB,
            batch: BatchConfig::default(),
            call_timeout: Duration::from_millis(30_000),
            retry_delay: Duration::from_millis(1_000),
        }
    }
}

impl QueueConfig {
    pub fn with_deployment_key(mut self, key: impl Into<String>) -> Self {
        self.deployment_key = key.into();
        self
    }

    pub fn with_large_payload_kb(mut self, kb: usize) -> Self {
        self.large_payload_kb = kb;
        self
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Tiering threshold in bytes.
    pub fn large_payload_bytes(&self) -> usize {
        self.large_payload_kb.saturating_mul(1024)
    }

    /// Build a config from environment variables.
    ///
    /// - `QUEUE_DEPLOYMENT_KEY` (default: `default`)
    /// - `QUEUE_LARGE_PAYLOAD_KB` (default: 100)
    /// - `BATCH_QUANTUM_MS` (default: 25000)
    /// - `BATCH_ITEMS_PER_QUANTUM` (optional)
    /// - `BATCH_WAKE_UP_DELAY_MS` (default: 1000)
    /// - `QUEUE_CALL_TIMEOUT_MS` (default: 30000)
    /// - `QUEUE_RETRY_DELAY_MS` (default: 1000)
    pub fn from_env() -> Result<Self, QueueError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`QueueConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, QueueError> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let millis = |name: &str, default: Duration| -> Result<Duration, QueueError> {
            match var(name) {
                Some(v) => Ok(Duration::from_millis(parse_number(name, &v)?)),
                None => Ok(default),
            }
        };

        let large_payload_kb = match var("QUEUE_LARGE_PAYLOAD_KB") {
            Some(v) => parse_number("QUEUE_LARGE_PAYLOAD_KB", &v)?,
            None => defaults.large_payload_kb,
        };

        let max_items_per_quantum = match var("BATCH_ITEMS_PER_QUANTUM") {
            Some(v) => {
                let n: usize = parse_number("BATCH_ITEMS_PER_QUANTUM", &v)?;
                if n == 0 {
                    return Err(QueueError::Config(
                        "BATCH_ITEMS_PER_QUANTUM must be at least 1".to_string(),
                    ));
                }
                Some(n)
            }
            None => None,
        };

        Ok(Self {
            deployment_key: var("QUEUE_DEPLOYMENT_KEY").unwrap_or(defaults.deployment_key),
            large_payload_kb,
            batch: BatchConfig {
                quantum: millis("BATCH_QUANTUM_MS", defaults.batch.quantum)?,
                max_items_per_quantum,
                wake_up_delay: millis("BATCH_WAKE_UP_DELAY_MS", defaults.batch.wake_up_delay)?,
            },
            call_timeout: millis("QUEUE_CALL_TIMEOUT_MS", defaults.call_timeout)?,
            retry_delay: millis("QUEUE_RETRY_DELAY_MS", defaults.retry_delay)?,
        })
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, QueueError> {
    value
        .parse()
        .map_err(|_| QueueError::Config(format!("invalid number for {name}={value}")))
}

/// Secret values handed to handlers, e.g. API tokens.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    values: BTreeMap<String, String>,
}

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Collect every `<PREFIX>NAME=value` variable as secret `NAME`.
    pub fn from_env_prefix(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let values = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let name = name.strip_prefix(prefix)?;
                (!name.is_empty()).then(|| (name.to_string(), value))
            })
            .collect();
        Self { values }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |k| vars.get(k).map(|v| v.to_string())
    }

    #[test]
    fn defaults_match_host_limits() -> Result<(), QueueError> {
        let config = QueueConfig::from_lookup(|_| None)?;
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.large_payload_bytes(), 100 * 1024);
        assert_eq!(config.batch.quantum, Duration::from_secs(25));
        assert_eq!(config.batch.max_items_per_quantum, None);
        Ok(())
    }

    #[test]
    fn env_overrides_are_parsed() -> Result<(), QueueError> {
        let vars = HashMap::from([
            ("QUEUE_DEPLOYMENT_KEY", "shop-3"),
            ("QUEUE_LARGE_PAYLOAD_KB", "64"),
            ("BATCH_ITEMS_PER_QUANTUM", "10"),
            ("BATCH_WAKE_UP_DELAY_MS", "5"),
            ("QUEUE_RETRY_DELAY_MS", "250"),
        ]);
        let config = QueueConfig::from_lookup(lookup(&vars))?;
        assert_eq!(config.deployment_key, "shop-3");
        assert_eq!(config.large_payload_kb, 64);
        assert_eq!(config.batch.max_items_per_quantum, Some(10));
        assert_eq!(config.batch.wake_up_delay, Duration::from_millis(5));
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let vars = HashMap::from([("BATCH_QUANTUM_MS", "soon")]);
        assert!(matches!(
            QueueConfig::from_lookup(lookup(&vars)),
            Err(QueueError::Config(_))
        ));

        let vars = HashMap::from([("BATCH_ITEMS_PER_QUANTUM", "0")]);
        assert!(matches!(
            QueueConfig::from_lookup(lookup(&vars)),
            Err(QueueError::Config(_))
        ));
    }

    #[test]
    fn secrets_strip_prefix_and_redact_debug() {
        let secrets = Secrets::from_vars(
            "HOOKQ_SECRET_",
            [
                ("HOOKQ_SECRET_API_TOKEN".to_string(), "s3cr3t".to_string()),
                ("PATH".to_string(), "/usr/bin".to_string()),
            ],
        );
        assert_eq!(secrets.get("API_TOKEN"), Some("s3cr3t"));
        assert_eq!(secrets.names().count(), 1);
        let debug = format!("{secrets:?}");
        assert!(debug.contains("API_TOKEN"));
        assert!(!debug.contains("s3cr3t"));
    }
}
