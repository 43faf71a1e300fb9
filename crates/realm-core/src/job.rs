use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The JSON envelope carried as a broker message body.
///
/// Only the fields every job shares are modeled explicitly; everything
/// action-specific (`srcpath`, `duration`, `size`, ...) lives in `extra` so
/// that custom actions registered at runtime can carry arbitrary payloads
/// without this crate knowing about them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub action: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Seconds since epoch, stamped by the publisher on submit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_origin: Option<f64>,

    /// Publisher name, stamped by the publisher on submit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_origin: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Job {
    pub fn new(action: impl Into<String>) -> Self {
        Job {
            action: action.into(),
            topic: None,
            time_origin: None,
            source_origin: None,
            extra: Map::new(),
        }
    }

    pub fn from_json(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.extra.get(key).and_then(Value::as_f64)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.extra.get(key).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.extra.get(key).and_then(Value::as_i64)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Fills in a string field from `fallback` if the job itself doesn't
    /// declare one. Used by the sink to backfill `host`/`transfermethod`/
    /// `username` from its own config, per spec.md 3 "Job (wire message)".
    pub fn fill_str(&mut self, key: &str, fallback: &str) {
        if self.get_str(key).is_none() {
            self.set(key, fallback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_transfer_job_through_json() {
        let body = br#"{
            "action": "transfer",
            "srcpath": "/tmp/a.bin",
            "host": "localhost",
            "transfermethod": "copy",
            "size": 1024,
            "time_origin": 1700000000.5,
            "source_origin": "pub1"
        }"#;
        let job = Job::from_json(body).unwrap();
        assert_eq!(job.action, "transfer");
        assert_eq!(job.get_str("srcpath"), Some("/tmp/a.bin"));
        assert_eq!(job.get_u64("size"), Some(1024));
        assert_eq!(job.source_origin.as_deref(), Some("pub1"));

        let out = job.to_json_vec().unwrap();
        let roundtripped = Job::from_json(&out).unwrap();
        assert_eq!(job, roundtripped);
    }

    #[test]
    fn fill_str_only_applies_when_missing() {
        let mut job = Job::new("transfer");
        job.fill_str("host", "fallback-host");
        assert_eq!(job.get_str("host"), Some("fallback-host"));

        job.set("host", "explicit-host");
        job.fill_str("host", "fallback-host");
        assert_eq!(job.get_str("host"), Some("explicit-host"));
    }

    #[test]
    fn unknown_action_carries_arbitrary_extra_fields() {
        let body = br#"{"action":"debug","anything":[1,2,3]}"#;
        let job = Job::from_json(body).unwrap();
        assert_eq!(job.action, "debug");
        assert!(job.extra.contains_key("anything"));
    }
}
