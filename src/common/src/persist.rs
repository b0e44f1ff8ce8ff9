//! Rename-atomic JSON snapshot persistence.
//!
//! Metric and state files are written through a temp file in the same
//! directory followed by a rename, so concurrent readers never observe a
//! half-written document.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serialize `value` and replace `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let raw = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&tmp, raw)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Wrap a metric body in the versioned snapshot envelope `{version, ts, ...}`.
pub fn snapshot_envelope(body: serde_json::Value) -> serde_json::Value {
    let mut envelope = json!({
        "version": SNAPSHOT_VERSION,
        "ts": Utc::now().to_rfc3339(),
    });
    if let (Some(env), Some(map)) = (envelope.as_object_mut(), body.as_object()) {
        for (k, v) in map {
            env.insert(k.clone(), v.clone());
        }
    }
    envelope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mm-metrics.json");

        let body = snapshot_envelope(json!({ "quotes": 42, "fills": 3 }));
        write_json_atomic(&path, &body).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["version"], 1);
        assert_eq!(parsed["quotes"], 42);
        assert!(parsed["ts"].is_string());
        // Temp file cleaned up by the rename.
        assert!(!dir.path().join("mm-metrics.json.tmp").exists());
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &json!({ "a": 1 })).unwrap();
        write_json_atomic(&path, &json!({ "b": 2 })).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed.get("a").is_none());
        assert_eq!(parsed["b"], 2);
    }
}
