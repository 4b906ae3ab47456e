//! Atomic JSON persistence of agent records.
//!
//! One document per agent under `paseoHome/agents/<id>.json`. Every update
//! writes a temp file and renames it over the old document; writes are
//! serialized per record by a keyed lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use paseo_domain::agent::AgentRecord;
use paseo_domain::{Error, Result};

pub struct AgentStorage {
    dir: PathBuf,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AgentStorage {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Load every persisted record at boot. Malformed documents are skipped
    /// with a warning; corruption of one agent never takes the daemon down.
    pub fn load_all(&self) -> Result<Vec<AgentRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(Error::Io)
                .and_then(|raw| serde_json::from_str::<AgentRecord>(&raw).map_err(Error::Json))
            {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping malformed agent record"
                    );
                }
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    pub fn load(&self, id: &str) -> Result<Option<AgentRecord>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Write-temp-then-rename upsert, serialized per record.
    pub async fn upsert(&self, record: &AgentRecord) -> Result<()> {
        let lock = self.lock_for(&record.id);
        let _guard = lock.lock().await;

        let json = serde_json::to_vec_pretty(record)?;
        let path = self.record_path(&record.id);
        let tmp = self.dir.join(format!("{}.json.tmp", record.id));
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<bool> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let path = self.record_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paseo_domain::agent::{AgentConfig, AgentMode};
    use std::collections::HashMap as StdHashMap;

    fn record(id: &str) -> AgentRecord {
        AgentRecord::new(
            id.into(),
            AgentConfig {
                provider: "scripted".into(),
                model: None,
                cwd: PathBuf::from("/tmp"),
                mode: AgentMode::Default,
                labels: StdHashMap::new(),
            },
        )
    }

    #[tokio::test]
    async fn store_then_load_is_structurally_equal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AgentStorage::open(dir.path()).unwrap();

        let mut rec = record("a1");
        rec.title = Some("Fix the build".into());
        storage.upsert(&rec).await.unwrap();

        let loaded = storage.load("a1").unwrap().unwrap();
        assert_eq!(loaded.id, rec.id);
        assert_eq!(loaded.title, rec.title);
        assert_eq!(loaded.config.provider, "scripted");

        // No temp file left behind.
        assert!(!dir.path().join("a1.json.tmp").exists());
    }

    #[tokio::test]
    async fn load_all_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AgentStorage::open(dir.path()).unwrap();
        storage.upsert(&record("good")).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();

        let records = storage.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "good");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AgentStorage::open(dir.path()).unwrap();
        storage.upsert(&record("a1")).await.unwrap();

        assert!(storage.remove("a1").await.unwrap());
        assert!(!storage.remove("a1").await.unwrap());
        assert!(storage.load("a1").unwrap().is_none());
    }
}
