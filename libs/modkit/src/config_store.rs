//! Per-module JSON configuration documents, one file per module under
//! `config_path`.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;

use crate::error::ConfigStoreError;

/// Loads, caches, and persists one JSON document per module name.
pub struct ConfigStore {
    config_path: PathBuf,
    cache: RwLock<HashMap<String, serde_json::Value>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.config_path.join(format!("{name}.json"))
    }

    /// Creates `config_path` if needed, enumerates `*.json` files, and loads
    /// each one in parallel into the in-memory cache.
    ///
    /// # Errors
    /// Returns [`ConfigStoreError::CreateDir`] if the directory can't be
    /// created, or a [`ConfigStoreError::Read`]/[`ConfigStoreError::Parse`]
    /// for the first file that fails to load.
    pub async fn load_all_configs(&self) -> Result<(), ConfigStoreError> {
        tokio::fs::create_dir_all(&self.config_path)
            .await
            .map_err(|source| ConfigStoreError::CreateDir {
                path: self.config_path.display().to_string(),
                source,
            })?;

        let mut entries = tokio::fs::read_dir(&self.config_path)
            .await
            .map_err(|source| ConfigStoreError::Read {
                name: "*".to_string(),
                source,
            })?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| ConfigStoreError::Read {
                name: "*".to_string(),
                source,
            })?
        {
            let path = entry.path();
            if path.extension().and_then(std::ffi::OsStr::to_str) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(std::ffi::OsStr::to_str) {
                    names.push(stem.to_string());
                }
            }
        }

        let loads = names.iter().map(|name| self.read_document(name));
        let documents = futures::future::try_join_all(loads).await?;

        let mut cache = self.cache.write();
        for (name, doc) in names.into_iter().zip(documents) {
            cache.insert(name, doc);
        }

        Ok(())
    }

    async fn read_document(&self, name: &str) -> Result<serde_json::Value, ConfigStoreError> {
        let path = self.path_for(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| ConfigStoreError::Parse {
                name: name.to_string(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(serde_json::json!({})),
            Err(source) => Err(ConfigStoreError::Read {
                name: name.to_string(),
                source,
            }),
        }
    }

    /// Reads `{name}.json` and caches it; a missing file yields an empty
    /// object and is not an error.
    pub async fn load_config(&self, name: &str) -> Result<serde_json::Value, ConfigStoreError> {
        let doc = self.read_document(name).await?;
        self.cache.write().insert(name.to_string(), doc.clone());
        Ok(doc)
    }

    /// Serializes `value` with two-space indentation and writes `{name}.json`.
    pub async fn save_config(&self, name: &str, value: serde_json::Value) -> Result<(), ConfigStoreError> {
        tokio::fs::create_dir_all(&self.config_path)
            .await
            .map_err(|source| ConfigStoreError::CreateDir {
                path: self.config_path.display().to_string(),
                source,
            })?;

        let text = serde_json::to_string_pretty(&value).map_err(|source| ConfigStoreError::Parse {
            name: name.to_string(),
            source,
        })?;

        tokio::fs::write(self.path_for(name), text)
            .await
            .map_err(|source| ConfigStoreError::Write {
                name: name.to_string(),
                source,
            })?;

        self.cache.write().insert(name.to_string(), value);
        Ok(())
    }

    /// Shallow-merges `patch` onto the current (or empty) document and saves.
    pub async fn update_config(&self, name: &str, patch: serde_json::Value) -> Result<serde_json::Value, ConfigStoreError> {
        let mut current = self.get_config(name).unwrap_or_else(|| serde_json::json!({}));
        if let (Some(current_map), Some(patch_map)) = (current.as_object_mut(), patch.as_object()) {
            for (k, v) in patch_map {
                current_map.insert(k.clone(), v.clone());
            }
        }
        self.save_config(name, current.clone()).await?;
        Ok(current)
    }

    pub async fn delete_config(&self, name: &str) -> Result<(), ConfigStoreError> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ConfigStoreError::Write {
                    name: name.to_string(),
                    source,
                })
            }
        }
        self.cache.write().remove(name);
        Ok(())
    }

    #[must_use]
    pub fn has_config(&self, name: &str) -> bool {
        self.cache.read().contains_key(name)
    }

    #[must_use]
    pub fn get_config(&self, name: &str) -> Option<serde_json::Value> {
        self.cache.read().get(name).cloned()
    }

    /// Snapshot of every cached document, keyed by module name.
    #[must_use]
    pub fn all(&self) -> HashMap<String, serde_json::Value> {
        self.cache.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_get_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save_config("demo", serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(store.get_config("demo"), Some(serde_json::json!({"a": 1})));
        assert!(store.has_config("demo"));
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let doc = store.load_config("missing").await.unwrap();
        assert_eq!(doc, serde_json::json!({}));
    }

    #[tokio::test]
    async fn update_config_shallow_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save_config("demo", serde_json::json!({"a": 1, "b": 2})).await.unwrap();
        let merged = store.update_config("demo", serde_json::json!({"b": 3, "c": 4})).await.unwrap();
        assert_eq!(merged, serde_json::json!({"a": 1, "b": 3, "c": 4}));
    }

    #[tokio::test]
    async fn delete_config_removes_file_and_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        store.save_config("demo", serde_json::json!({})).await.unwrap();
        store.delete_config("demo").await.unwrap();
        assert!(!store.has_config("demo"));
        assert!(!dir.path().join("demo.json").exists());
    }

    #[tokio::test]
    async fn load_all_configs_discovers_json_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("one.json"), "{\"x\":1}").await.unwrap();
        tokio::fs::write(dir.path().join("two.json"), "{\"y\":2}").await.unwrap();
        let store = ConfigStore::new(dir.path());
        store.load_all_configs().await.unwrap();
        assert_eq!(store.get_config("one"), Some(serde_json::json!({"x": 1})));
        assert_eq!(store.get_config("two"), Some(serde_json::json!({"y": 2})));
    }
}
