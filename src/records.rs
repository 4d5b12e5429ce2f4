use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::location::GeoFix;

/// Persisted trace of a confirmed incident. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccidentRecord {
    /// Epoch milliseconds, same value as `timestamp`
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

impl AccidentRecord {
    pub fn new(fix: GeoFix, timestamp_ms: i64) -> Self {
        Self {
            id: timestamp_ms,
            latitude: fix.latitude,
            longitude: fix.longitude,
            timestamp: timestamp_ms,
        }
    }

    pub fn now(fix: GeoFix) -> Self {
        Self::new(fix, Utc::now().timestamp_millis())
    }

    pub fn fix(&self) -> GeoFix {
        GeoFix::new(self.latitude, self.longitude)
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Append-only accident history.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append(&self, record: &AccidentRecord) -> Result<(), StoreError>;

    /// All records, oldest first.
    async fn list(&self) -> Result<Vec<AccidentRecord>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<AccidentRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError("record store lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append(&self, record: &AccidentRecord) -> Result<(), StoreError> {
        self.records.lock().map_err(|_| poisoned())?.push(record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<AccidentRecord>, StoreError> {
        Ok(self.records.lock().map_err(|_| poisoned())?.clone())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.lock().map_err(|_| poisoned())?.clear();
        Ok(())
    }
}

/// One JSON record per line. Appends serialize through `write_lock` so
/// concurrent dispatches never interleave lines.
pub struct JsonlRecordStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn append(&self, record: &AccidentRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError(format!("append task failed: {}", e)))?
    }

    async fn list(&self) -> Result<Vec<AccidentRecord>, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<AccidentRecord>, StoreError> {
            if !path.exists() {
                return Ok(Vec::new());
            }
            let reader = BufReader::new(fs::File::open(&path)?);
            let mut records = Vec::new();
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AccidentRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(err) => log::warn!(
                        "[RECORDS] Skipping line {} of {}: {}",
                        lineno + 1,
                        path.display(),
                        err
                    ),
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| StoreError(format!("list task failed: {}", e)))?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_is_timestamp() {
        let record = AccidentRecord::new(GeoFix::new(1.0, 2.0), 1_700_000_000_000);
        assert_eq!(record.id, record.timestamp);
        assert_eq!(record.fix(), GeoFix::new(1.0, 2.0));
        assert_eq!(
            record.time().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }

    #[test]
    fn test_record_json_shape() {
        let record = AccidentRecord::new(GeoFix::new(1.0, 2.0), 42);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 42, "latitude": 1.0, "longitude": 2.0, "timestamp": 42})
        );
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryRecordStore::new();
        store.append(&AccidentRecord::new(GeoFix::new(1.0, 2.0), 1)).await.unwrap();
        store.append(&AccidentRecord::new(GeoFix::new(3.0, 4.0), 2)).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 1);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_store_appends_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlRecordStore::new(dir.path().join("history").join("accidents.jsonl"));

        assert!(store.list().await.unwrap().is_empty());

        store.append(&AccidentRecord::new(GeoFix::new(1.0, 2.0), 10)).await.unwrap();
        store.append(&AccidentRecord::new(GeoFix::new(3.0, 4.0), 20)).await.unwrap();

        let text = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(text.lines().count(), 2);

        let records = store.list().await.unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![10, 20]);

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_jsonl_store_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accidents.jsonl");
        std::fs::write(
            &path,
            "{\"id\":1,\"latitude\":1.0,\"longitude\":2.0,\"timestamp\":1}\ngarbage\n\n",
        )
        .unwrap();

        let store = JsonlRecordStore::new(&path);
        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
    }
}
