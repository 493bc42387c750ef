//! Update record stores

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use dm_core::error::StoreError;
use dm_core::traits::UpdateStore;
use dm_core::ImageUpdateRecord;

type RecordKey = (String, String);

fn key(host: &str, image_id: &str) -> RecordKey {
    (host.to_string(), image_id.to_string())
}

/// Process-local store; records are lost on exit
#[derive(Debug, Default)]
pub struct MemoryUpdateStore {
    records: DashMap<RecordKey, ImageUpdateRecord>,
}

impl MemoryUpdateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl UpdateStore for MemoryUpdateStore {
    async fn get_update_available(
        &self,
        host: &str,
        image_ids: &[String],
    ) -> Result<HashMap<String, ImageUpdateRecord>, StoreError> {
        Ok(image_ids
            .iter()
            .filter_map(|id| {
                self.records
                    .get(&key(host, id))
                    .map(|record| (id.clone(), record.value().clone()))
            })
            .collect())
    }

    async fn save(&self, record: ImageUpdateRecord) -> Result<(), StoreError> {
        self.records
            .insert(key(&record.host, &record.image_id), record);
        Ok(())
    }

    async fn delete(&self, host: &str, image_ids: &[String]) -> Result<(), StoreError> {
        for id in image_ids {
            self.records.remove(&key(host, id));
        }
        Ok(())
    }
}

/// Store persisted as a JSON array of records.
///
/// The whole file is replaced through a sibling `.tmp` file on every change;
/// a missing file reads as empty.
#[derive(Debug)]
pub struct JsonFileUpdateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileUpdateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<ImageUpdateRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, records: &[ImageUpdateRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UpdateStore for JsonFileUpdateStore {
    async fn get_update_available(
        &self,
        host: &str,
        image_ids: &[String],
    ) -> Result<HashMap<String, ImageUpdateRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self
            .read()
            .await?
            .into_iter()
            .filter(|r| r.host == host && image_ids.contains(&r.image_id))
            .map(|r| (r.image_id.clone(), r))
            .collect())
    }

    async fn save(&self, record: ImageUpdateRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        records.retain(|r| !(r.host == record.host && r.image_id == record.image_id));
        records.push(record);
        self.write(&records).await
    }

    async fn delete(&self, host: &str, image_ids: &[String]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|r| !(r.host == host && image_ids.contains(&r.image_id)));
        if records.len() == before {
            return Ok(());
        }
        self.write(&records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_memory_store_keeps_one_record_per_image() {
        let store = MemoryUpdateStore::new();
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:a")).await.unwrap();
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:b")).await.unwrap();

        let found = store.get_update_available("local", &ids(&["img1", "img2"])).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found["img1"].update_ref, "sha256:b");
    }

    #[tokio::test]
    async fn test_memory_store_scopes_by_host() {
        let store = MemoryUpdateStore::new();
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:a")).await.unwrap();
        store.save(ImageUpdateRecord::new("edge-1", "img1", "sha256:a")).await.unwrap();

        store.delete("local", &ids(&["img1"])).await.unwrap();

        assert!(store.get_update_available("local", &ids(&["img1"])).await.unwrap().is_empty());
        assert_eq!(store.get_update_available("edge-1", &ids(&["img1"])).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileUpdateStore::new(dir.path().join("updates.json"));

        let found = store.get_update_available("local", &ids(&["img1"])).await.unwrap();
        assert!(found.is_empty());
        store.delete("local", &ids(&["img1"])).await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_json_store_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("updates.json");

        let store = JsonFileUpdateStore::new(&path);
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:a")).await.unwrap();
        store.save(ImageUpdateRecord::new("local", "img2", "sha256:b")).await.unwrap();
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:c")).await.unwrap();
        drop(store);

        let reopened = JsonFileUpdateStore::new(&path);
        let found = reopened
            .get_update_available("local", &ids(&["img1", "img2"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["img1"].update_ref, "sha256:c");

        reopened.delete("local", &ids(&["img2"])).await.unwrap();
        let found = reopened
            .get_update_available("local", &ids(&["img1", "img2"]))
            .await
            .unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["img1"]);
    }

    #[tokio::test]
    async fn test_json_store_replaces_file_through_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("updates.json");
        let temp_path = dir.path().join("updates.tmp");

        let store = JsonFileUpdateStore::new(&path);
        store.save(ImageUpdateRecord::new("local", "img1", "sha256:a")).await.unwrap();

        // Interrupted earlier write
        std::fs::write(&temp_path, "{\"trunc").unwrap();
        let found = store.get_update_available("local", &ids(&["img1"])).await.unwrap();
        assert_eq!(found.len(), 1);

        store.save(ImageUpdateRecord::new("local", "img2", "sha256:b")).await.unwrap();

        assert!(!temp_path.exists());
        let on_disk: Vec<ImageUpdateRecord> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("updates.json");
        std::fs::write(&path, "not json").unwrap();

        let store = JsonFileUpdateStore::new(&path);
        let err = store.get_update_available("local", &ids(&["img1"])).await.unwrap_err();
        assert!(matches!(err, StoreError::Serde(_)));
    }
}
