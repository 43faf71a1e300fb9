use thiserror::Error;

/// Missing or invalid YAML configuration keys. Fatal at startup (spec.md 7).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required config key '{0}'")]
    MissingKey(String),
    #[error("invalid value for config key '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("name (-n) '{name}' is not one of the configured queues: {available:?}")]
    UnknownQueue { name: String, available: Vec<String> },
}
