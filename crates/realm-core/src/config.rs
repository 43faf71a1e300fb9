use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_TOPIC: &str = "general";
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RECOVER_INTERVAL_SECS: u64 = 60;

fn default_topic() -> String {
    DEFAULT_TOPIC.to_string()
}

fn default_realm_port() -> u16 {
    5672
}

fn default_priority() -> u8 {
    0
}

fn default_transient() -> bool {
    true
}

fn default_transfer_direction() -> String {
    "from".to_string()
}

/// Connection and realm-scoped settings shared by every role's config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RealmConnection {
    pub realm: String,
    pub realm_host: String,
    #[serde(default = "default_realm_port")]
    pub realm_port: u16,
    pub realm_username: String,
    pub realm_password: String,
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    #[serde(default)]
    pub backlog_queue: Option<String>,
}

impl RealmConnection {
    pub fn amqp_url(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}",
            self.realm_username, self.realm_password, self.realm_host, self.realm_port
        )
    }
}

/// `pub.yml`-shaped configuration, read by `realm-publish`.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(flatten)]
    pub realm: RealmConnection,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub message_persist: bool,
    #[serde(default)]
    pub ttl_sec: Option<f64>,
    #[serde(default)]
    pub recover_interval: Option<u64>,
}

/// `sub.yml`-shaped configuration, read by `realm-sink`.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(flatten)]
    pub realm: RealmConnection,
    #[serde(default = "default_topic")]
    pub topic: String,
    pub num_workers: usize,
    /// `key.split('-')[0]` is this sink's name and its sole default queue,
    /// matching `datasink.py`'s `server()`.
    pub key: String,
    #[serde(default)]
    pub retry_interval: Option<u64>,
    #[serde(default)]
    pub datadir: Option<String>,
    #[serde(default)]
    pub movedir: Option<String>,
    #[serde(default)]
    pub unpack_tarfiles: bool,
    #[serde(default)]
    pub insfilter: Option<Vec<String>>,
    #[serde(default)]
    pub storeby: Option<String>,
    #[serde(default)]
    pub md5check: bool,
    #[serde(default)]
    pub transfer_host: Option<String>,
    #[serde(default)]
    pub transfer_method: Option<String>,
    #[serde(default)]
    pub transfer_username: Option<String>,
    #[serde(default = "default_transfer_direction")]
    pub transfer_direction: String,
}

impl SinkConfig {
    pub fn name(&self) -> &str {
        self.key.split('-').next().unwrap_or(&self.key)
    }

    pub fn queue_names(&self) -> Vec<String> {
        vec![self.name().to_string()]
    }

    pub fn datadir_or_cwd(&self) -> std::io::Result<String> {
        match &self.datadir {
            Some(d) => Ok(d.clone()),
            None => Ok(std::env::current_dir()?.to_string_lossy().into_owned()),
        }
    }
}

/// Per-queue declaration options, nested under `queues:` in the hub config
/// (spec.md 3 "Realm configuration").
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueueOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub persist: bool,
    #[serde(default = "default_transient")]
    pub transient: bool,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub queue_length: Option<u32>,
    #[serde(default)]
    pub ttl_sec: Option<f64>,
}

impl QueueOptions {
    pub fn resolved_topic(&self) -> &str {
        self.topic.as_deref().unwrap_or(DEFAULT_TOPIC)
    }

    pub fn resolved_priority(&self, default_priority: u8) -> u8 {
        self.priority.unwrap_or(default_priority)
    }
}

/// `hub.yml`-shaped configuration, read by `realm-hub` and `realm-queue`.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(flatten)]
    pub realm: RealmConnection,
    #[serde(default)]
    pub queues: HashMap<String, QueueOptions>,
}

/// Loads and parses a YAML config file, appending a `.yml` extension if the
/// caller omitted one (matching `initialize.read_config`'s behavior).
pub fn load_yaml<T: DeserializeOwned>(path: &str) -> Result<T, ConfigError> {
    let resolved = if path.ends_with(".yml") || path.ends_with(".yaml") {
        path.to_string()
    } else {
        format!("{path}.yml")
    };
    let buf = std::fs::read_to_string(&resolved).map_err(|e| ConfigError::Io {
        path: resolved.clone(),
        source: e,
    })?;
    serde_yaml::from_str(&buf).map_err(|e| ConfigError::Yaml {
        path: resolved,
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINK_YAML: &str = r#"
realm: datasink
realm_host: localhost
realm_username: guest
realm_password: guest
num_workers: 4
key: ins1-sink
datadir: /var/data
storeby: propid
md5check: true
"#;

    #[test]
    fn parses_sink_config_with_defaults() {
        let cfg: SinkConfig = serde_yaml::from_str(SINK_YAML).unwrap();
        assert_eq!(cfg.realm.realm_port, 5672);
        assert_eq!(cfg.topic, "general");
        assert_eq!(cfg.name(), "ins1");
        assert_eq!(cfg.queue_names(), vec!["ins1".to_string()]);
        assert_eq!(cfg.transfer_direction, "from");
    }

    #[test]
    fn queue_options_default_transient_true() {
        let opts: QueueOptions = serde_yaml::from_str("enabled: true").unwrap();
        assert!(opts.transient);
        assert!(opts.enabled);
        assert_eq!(opts.resolved_topic(), DEFAULT_TOPIC);
    }
}
