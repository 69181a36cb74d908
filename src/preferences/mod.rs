//! Preferences Store: a per-user two-level JSON document with
//! category/key operations, validated writes, and atomic persistence.

use std::path::{Path, PathBuf};

use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::error::{CoreError, Result};

static DEFAULT_PREFERENCES: Lazy<Value> = Lazy::new(|| {
    json!({
        "trading": {
            "max_position_size": 0.1,
            "risk_tolerance": "medium",
            "preferred_chains": ["ethereum", "polygon"],
            "auto_trade": false,
            "notification_channels": ["email", "websocket"],
        },
        "ui": {
            "theme": "light",
            "chart_interval": "1h",
            "default_view": "portfolio",
            "notifications_enabled": true,
            "sound_enabled": true,
        },
        "analysis": {
            "preferred_timeframes": ["1h", "4h", "1d"],
            "indicators": ["RSI", "MACD", "BB"],
            "emotion_alerts": true,
            "risk_alerts": true,
        },
        "rehoboam": {
            "ai_model": "anthropic/claude-2",
            "analysis_frequency": 300,
            "confidence_threshold": 0.7,
            "max_concurrent_positions": 5,
        },
    })
});

const KNOWN_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "1h", "4h", "1d", "1w"];
const KNOWN_THEMES: &[&str] = &["light", "dark", "system"];

/// A single user's document, serialized as one JSON file at
/// `{dir}/{user_id}_preferences.json`. File I/O is serialized per user by
/// holding the lock across both the mutation and the write-through.
pub struct PreferencesStore {
    dir: PathBuf,
    documents: dashmap::DashMap<String, Mutex<Value>>,
}

impl PreferencesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            documents: dashmap::DashMap::new(),
        }
    }

    fn file_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{user_id}_preferences.json"))
    }

    async fn load_or_default(&self, user_id: &str) -> Value {
        let path = self.file_path(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(e) => {
                    error!(user_id, error = %e, "corrupt preferences file, using defaults");
                    DEFAULT_PREFERENCES.clone()
                }
            },
            Err(_) => DEFAULT_PREFERENCES.clone(),
        }
    }

    async fn with_document<R>(&self, user_id: &str, f: impl FnOnce(&mut Value) -> R) -> R {
        if !self.documents.contains_key(user_id) {
            let loaded = self.load_or_default(user_id).await;
            self.documents.insert(user_id.to_string(), Mutex::new(loaded));
        }
        let entry = self.documents.get(user_id).unwrap();
        let mut guard = entry.lock().await;
        f(&mut guard)
    }

    /// Falls back through user → compiled-in default when the key is
    /// missing from the user's document.
    pub async fn get(&self, user_id: &str, category: &str, key: &str) -> Option<Value> {
        self.with_document(user_id, |doc| {
            doc.get(category)
                .and_then(|c| c.get(key))
                .cloned()
                .or_else(|| DEFAULT_PREFERENCES.get(category).and_then(|c| c.get(key)).cloned())
        })
        .await
    }

    pub async fn set(&self, user_id: &str, category: &str, key: &str, value: Value) -> Result<()> {
        validate(category, key, &value)?;
        self.with_document(user_id, |doc| {
            let obj = doc.as_object_mut().expect("document root is always an object");
            obj.entry(category.to_string())
                .or_insert_with(|| Value::Object(Map::new()))
                .as_object_mut()
                .expect("category values are always objects")
                .insert(key.to_string(), value);
        })
        .await;
        self.persist(user_id).await
    }

    pub async fn update_many(&self, user_id: &str, updates: Value) -> Result<()> {
        let Some(updates) = updates.as_object() else {
            return Err(CoreError::config("update_preferences payload must be an object"));
        };
        for (category, values) in updates {
            let Some(values) = values.as_object() else {
                return Err(CoreError::config(format!("category {category} update must be an object")));
            };
            for (key, value) in values {
                validate(category, key, value)?;
            }
        }
        self.with_document(user_id, |doc| {
            let obj = doc.as_object_mut().expect("document root is always an object");
            for (category, values) in updates {
                let entry = obj
                    .entry(category.clone())
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .expect("category values are always objects");
                for (key, value) in values.as_object().unwrap() {
                    entry.insert(key.clone(), value.clone());
                }
            }
        })
        .await;
        self.persist(user_id).await
    }

    pub async fn reset_category(&self, user_id: &str, category: &str) -> Result<()> {
        let Some(default) = DEFAULT_PREFERENCES.get(category) else {
            return Err(CoreError::config(format!("unknown preference category {category}")));
        };
        let default = default.clone();
        self.with_document(user_id, |doc| {
            doc.as_object_mut()
                .expect("document root is always an object")
                .insert(category.to_string(), default);
        })
        .await;
        self.persist(user_id).await
    }

    pub async fn reset_all(&self, user_id: &str) -> Result<()> {
        self.with_document(user_id, |doc| {
            *doc = DEFAULT_PREFERENCES.clone();
        })
        .await;
        self.persist(user_id).await
    }

    pub async fn export(&self, user_id: &str) -> Result<PathBuf> {
        let preferences = self.with_document(user_id, |doc| doc.clone()).await;
        let now = Utc::now();
        let filename = format!("{user_id}_preferences_export_{}.json", now.format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(filename);
        let envelope = json!({
            "user_id": user_id,
            "timestamp": now.to_rfc3339(),
            "preferences": preferences,
        });
        write_atomic(&path, &envelope).await?;
        info!(user_id, path = %path.display(), "exported preferences");
        Ok(path)
    }

    pub async fn import(&self, user_id: &str, data: Value) -> Result<()> {
        let preferences = data
            .get("preferences")
            .cloned()
            .ok_or_else(|| CoreError::config("import payload missing 'preferences'"))?;
        self.with_document(user_id, |doc| {
            *doc = preferences;
        })
        .await;
        self.persist(user_id).await
    }

    async fn persist(&self, user_id: &str) -> Result<()> {
        let value = self.with_document(user_id, |doc| doc.clone()).await;
        write_atomic(&self.file_path(user_id), &value).await
    }
}

fn validate(category: &str, key: &str, value: &Value) -> Result<()> {
    match (category, key) {
        ("trading", "max_position_size") => {
            let v = value.as_f64().ok_or_else(|| CoreError::config("max_position_size must be a number"))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(CoreError::config("max_position_size must be in [0,1]"));
            }
        }
        ("ui", "theme") => {
            let v = value.as_str().ok_or_else(|| CoreError::config("theme must be a string"))?;
            if !KNOWN_THEMES.contains(&v) {
                return Err(CoreError::config(format!("unknown theme {v}")));
            }
        }
        ("rehoboam", "confidence_threshold") => {
            let v = value
                .as_f64()
                .ok_or_else(|| CoreError::config("confidence_threshold must be a number"))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(CoreError::config("confidence_threshold must be in [0,1]"));
            }
        }
        ("analysis", "preferred_timeframes") => {
            let values = value
                .as_array()
                .ok_or_else(|| CoreError::config("preferred_timeframes must be an array"))?;
            for v in values {
                let s = v.as_str().ok_or_else(|| CoreError::config("timeframe must be a string"))?;
                if !KNOWN_TIMEFRAMES.contains(&s) {
                    return Err(CoreError::config(format!("unknown timeframe {s}")));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Write-temp-then-rename so a concurrent reader never observes a
/// partially written document.
async fn write_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    tokio::fs::write(&tmp_path, text).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path());
        store.set("u1", "ui", "theme", json!("dark")).await.unwrap();
        let value = store.get("u1", "ui", "theme").await;
        assert_eq!(value, Some(json!("dark")));
    }

    #[tokio::test]
    async fn missing_key_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path());
        let value = store.get("u1", "trading", "risk_tolerance").await;
        assert_eq!(value, Some(json!("medium")));
    }

    #[tokio::test]
    async fn reset_all_yields_compiled_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path());
        store.set("u1", "ui", "theme", json!("dark")).await.unwrap();
        store.reset_all("u1").await.unwrap();
        let value = store.get("u1", "ui", "theme").await;
        assert_eq!(value, Some(json!("light")));
    }

    #[tokio::test]
    async fn invalid_position_size_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path());
        let err = store.set("u1", "trading", "max_position_size", json!(2.0)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn export_then_import_reproduces_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path());
        store.set("u1", "ui", "theme", json!("dark")).await.unwrap();

        let export_path = store.export("u1").await.unwrap();
        let exported: Value = serde_json::from_str(&tokio::fs::read_to_string(&export_path).await.unwrap()).unwrap();

        store.reset_all("u1").await.unwrap();
        store.import("u1", exported).await.unwrap();

        let value = store.get("u1", "ui", "theme").await;
        assert_eq!(value, Some(json!("dark")));
    }
}
