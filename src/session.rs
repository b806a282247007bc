//! Per-(chat, tier) assistant session handles.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::Tier;

/// One resumable assistant conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub session_id: String,
    pub project_dir: String,
    pub last_used_at: DateTime<Utc>,
}

fn key(chat_id: &str, tier: Tier) -> String {
    format!("{chat_id}:{tier}")
}

/// Session handles keyed by `(chatId, tier)`, persisted as one JSON file.
/// Reads are cheap; writes are serialized behind the lock.
pub struct SessionStore {
    path: PathBuf,
    sessions: Mutex<HashMap<String, SessionData>>,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        SessionStore {
            path,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Load from disk. A missing file is an empty store.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let store = SessionStore::new(path);
        if store.path.exists() {
            let contents = tokio::fs::read_to_string(&store.path)
                .await
                .with_context(|| format!("Failed to read {}", store.path.display()))?;
            let sessions: HashMap<String, SessionData> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", store.path.display()))?;
            *store.sessions.lock().await = sessions;
        }
        Ok(store)
    }

    pub async fn save(&self) -> Result<()> {
        let sessions = self.sessions.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create state directory")?;
        }
        let contents =
            serde_json::to_string_pretty(&*sessions).context("Failed to serialize sessions")?;
        tokio::fs::write(&self.path, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub async fn get(&self, chat_id: &str, tier: Tier) -> Option<SessionData> {
        self.sessions.lock().await.get(&key(chat_id, tier)).cloned()
    }

    pub async fn session_id(&self, chat_id: &str, tier: Tier) -> Option<String> {
        self.get(chat_id, tier).await.map(|s| s.session_id)
    }

    /// Store a new handle for `(chat_id, tier)`, replacing any prior one.
    pub async fn set(&self, chat_id: &str, session_id: &str, project_dir: &str, tier: Tier) {
        self.sessions.lock().await.insert(
            key(chat_id, tier),
            SessionData {
                session_id: session_id.to_string(),
                project_dir: project_dir.to_string(),
                last_used_at: Utc::now(),
            },
        );
    }

    /// Drop the handle for one tier, or for every tier when `tier` is `None`.
    pub async fn clear(&self, chat_id: &str, tier: Option<Tier>) {
        let mut sessions = self.sessions.lock().await;
        match tier {
            Some(tier) => {
                sessions.remove(&key(chat_id, tier));
            }
            None => {
                let prefix = format!("{chat_id}:");
                sessions.retain(|k, _| !k.starts_with(&prefix));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_replaces_prior_handle() {
        let store = SessionStore::new(PathBuf::from("/nonexistent/sessions.json"));
        store.set("42", "first", "/work", Tier::Chat).await;
        store.set("42", "second", "/work", Tier::Chat).await;
        assert_eq!(
            store.session_id("42", Tier::Chat).await.as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_tiers_are_independent() {
        let store = SessionStore::new(PathBuf::from("/nonexistent/sessions.json"));
        store.set("42", "chat-s", "/work", Tier::Chat).await;
        store.set("42", "worker-s", "/work", Tier::Worker).await;
        assert_eq!(
            store.session_id("42", Tier::Chat).await.as_deref(),
            Some("chat-s")
        );
        assert_eq!(
            store.session_id("42", Tier::Worker).await.as_deref(),
            Some("worker-s")
        );
    }

    #[tokio::test]
    async fn test_clear_one_tier() {
        let store = SessionStore::new(PathBuf::from("/nonexistent/sessions.json"));
        store.set("42", "a", "/w", Tier::Chat).await;
        store.set("42", "b", "/w", Tier::Worker).await;
        store.clear("42", Some(Tier::Chat)).await;
        assert!(store.session_id("42", Tier::Chat).await.is_none());
        assert!(store.session_id("42", Tier::Worker).await.is_some());
    }

    #[tokio::test]
    async fn test_clear_all_tiers() {
        let store = SessionStore::new(PathBuf::from("/nonexistent/sessions.json"));
        store.set("42", "a", "/w", Tier::Chat).await;
        store.set("42", "b", "/w", Tier::Orchestrator).await;
        store.set("7", "c", "/w", Tier::Chat).await;
        store.clear("42", None).await;
        assert!(store.session_id("42", Tier::Chat).await.is_none());
        assert!(store.session_id("42", Tier::Orchestrator).await.is_none());
        assert!(store.session_id("7", Tier::Chat).await.is_some());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");

        let store = SessionStore::new(path.clone());
        store.set("42", "persisted", "/work", Tier::Chat).await;
        store.save().await.unwrap();

        let reloaded = SessionStore::load(path).await.unwrap();
        let data = reloaded.get("42", Tier::Chat).await.unwrap();
        assert_eq!(data.session_id, "persisted");
        assert_eq!(data.project_dir, "/work");
    }
}
