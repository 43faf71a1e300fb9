use std::cmp::Ordering;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};

/// Guarantees IDs are monotonically unique even if two requests are built in
/// the same microsecond (spec.md 3 "collision-free within one publisher per
/// microsecond").
static LAST_ID_MICROS: AtomicI64 = AtomicI64::new(0);

fn next_id_micros() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64;

    loop {
        let prev = LAST_ID_MICROS.load(AtomicOrdering::SeqCst);
        let candidate = if now > prev { now } else { prev + 1 };
        if LAST_ID_MICROS
            .compare_exchange(prev, candidate, AtomicOrdering::SeqCst, AtomicOrdering::SeqCst)
            .is_ok()
        {
            return candidate;
        }
    }
}

/// A persistable, JSON-serializable transfer request, built incrementally and
/// optionally ordered by priority (spec.md 3 "TransferRequest (persistable)").
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    fields: Map<String, Value>,
}

impl TransferRequest {
    pub fn new(
        srcpath: impl Into<String>,
        dstpath: impl Into<String>,
        username: impl Into<String>,
        host: impl Into<String>,
        transfermethod: impl Into<String>,
    ) -> Self {
        let id = format!("{:020}", next_id_micros());
        let mut fields = Map::new();
        fields.insert("id".into(), Value::String(id));
        fields.insert("srcpath".into(), Value::String(srcpath.into()));
        fields.insert("dstpath".into(), Value::String(dstpath.into()));
        fields.insert("username".into(), Value::String(username.into()));
        fields.insert("host".into(), Value::String(host.into()));
        fields.insert("transfermethod".into(), Value::String(transfermethod.into()));
        fields.insert("size".into(), Value::Null);
        fields.insert("md5sum".into(), Value::Null);
        fields.insert("priority".into(), Value::Null);
        TransferRequest { fields }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.fields.insert("size".into(), Value::from(size));
        self
    }

    pub fn with_md5sum(mut self, md5sum: impl Into<String>) -> Self {
        self.fields.insert("md5sum".into(), Value::String(md5sum.into()));
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.fields.insert("priority".into(), Value::from(priority));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        self.fields.get("id").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn priority(&self) -> Option<i64> {
        self.fields.get("priority").and_then(Value::as_i64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }

    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let fields: Map<String, Value> = serde_json::from_str(s)?;
        Ok(TransferRequest { fields })
    }

    pub fn store(&self, path: impl AsRef<std::path::Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_json_string().unwrap_or_default())
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let buf = std::fs::read_to_string(path)?;
        Self::from_json_str(&buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl PartialOrd for TransferRequest {
    /// Unordered when either side has no priority, per spec.md 3.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.priority(), other.priority()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_fields() {
        let req = TransferRequest::new("/tmp/a.bin", "/data/a.bin", "alice", "host1", "scp")
            .with_size(1024)
            .with_md5sum("deadbeef");

        let s = req.to_json_string().unwrap();
        let loaded = TransferRequest::from_json_str(&s).unwrap();
        assert_eq!(req, loaded);
        assert_eq!(loaded.fields.get("size").and_then(Value::as_u64), Some(1024));
    }

    #[test]
    fn ids_are_monotonically_unique() {
        let a = TransferRequest::new("a", "b", "u", "h", "scp");
        let b = TransferRequest::new("a", "b", "u", "h", "scp");
        assert!(a.id() < b.id());
    }

    #[test]
    fn ordering_is_none_without_both_priorities() {
        let a = TransferRequest::new("a", "b", "u", "h", "scp").with_priority(1);
        let b = TransferRequest::new("a", "b", "u", "h", "scp");
        assert_eq!(a.partial_cmp(&b), None);

        let c = TransferRequest::new("a", "b", "u", "h", "scp").with_priority(2);
        assert_eq!(a.partial_cmp(&c), Some(Ordering::Less));
    }
}
