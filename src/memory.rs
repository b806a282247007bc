//! Durable per-chat memory notes.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{MemoryNote, NoteSource};

/// Per-chat insertion-ordered notes, persisted as one JSON file.
pub struct MemoryStore {
    path: PathBuf,
    notes: Mutex<HashMap<String, Vec<MemoryNote>>>,
}

impl MemoryStore {
    pub fn new(path: PathBuf) -> Self {
        MemoryStore {
            path,
            notes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn load(path: PathBuf) -> Result<Self> {
        let store = MemoryStore::new(path);
        if store.path.exists() {
            let contents = tokio::fs::read_to_string(&store.path)
                .await
                .with_context(|| format!("Failed to read {}", store.path.display()))?;
            let notes: HashMap<String, Vec<MemoryNote>> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", store.path.display()))?;
            *store.notes.lock().await = notes;
        }
        Ok(store)
    }

    pub async fn save(&self) -> Result<()> {
        let notes = self.notes.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create state directory")?;
        }
        let contents =
            serde_json::to_string_pretty(&*notes).context("Failed to serialize memory")?;
        tokio::fs::write(&self.path, contents)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Add a note. Whitespace-only text is dropped and returns `None`.
    pub async fn add(&self, chat_id: &str, text: &str, source: NoteSource) -> Option<MemoryNote> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let note = MemoryNote {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            source,
            created_at: Utc::now(),
        };
        self.notes
            .lock()
            .await
            .entry(chat_id.to_string())
            .or_default()
            .push(note.clone());
        Some(note)
    }

    pub async fn notes(&self, chat_id: &str) -> Vec<MemoryNote> {
        self.notes
            .lock()
            .await
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn remove(&self, chat_id: &str, note_id: &str) -> bool {
        let mut notes = self.notes.lock().await;
        match notes.get_mut(chat_id) {
            Some(list) => {
                let before = list.len();
                list.retain(|n| n.id != note_id);
                list.len() != before
            }
            None => false,
        }
    }

    /// Context block prepended to chat prompts, or `None` when the chat has
    /// no notes.
    pub async fn context_block(&self, chat_id: &str) -> Option<String> {
        let notes = self.notes.lock().await;
        let list = notes.get(chat_id)?;
        if list.is_empty() {
            return None;
        }
        let mut block = String::from("[MEMORY CONTEXT]\n");
        for note in list {
            block.push_str("- ");
            block.push_str(&note.text);
            block.push('\n');
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_trims_and_rejects_empty() {
        let store = MemoryStore::new(PathBuf::from("/nonexistent/memory.json"));
        assert!(store.add("42", "   ", NoteSource::Auto).await.is_none());

        let note = store
            .add("42", "  prefers dark mode  ", NoteSource::Auto)
            .await
            .unwrap();
        assert_eq!(note.text, "prefers dark mode");
    }

    #[tokio::test]
    async fn test_context_block_format() {
        let store = MemoryStore::new(PathBuf::from("/nonexistent/memory.json"));
        assert!(store.context_block("42").await.is_none());

        store.add("42", "deploys on Fridays", NoteSource::Auto).await;
        store.add("42", "staging is flaky", NoteSource::Manual).await;

        let block = store.context_block("42").await.unwrap();
        assert_eq!(
            block,
            "[MEMORY CONTEXT]\n- deploys on Fridays\n- staging is flaky\n"
        );
    }

    #[tokio::test]
    async fn test_notes_are_insertion_ordered() {
        let store = MemoryStore::new(PathBuf::from("/nonexistent/memory.json"));
        for i in 0..5 {
            store
                .add("42", &format!("note {i}"), NoteSource::Auto)
                .await;
        }
        let notes = store.notes("42").await;
        assert_eq!(notes.len(), 5);
        assert_eq!(notes[0].text, "note 0");
        assert_eq!(notes[4].text, "note 4");
    }

    #[tokio::test]
    async fn test_remove_note() {
        let store = MemoryStore::new(PathBuf::from("/nonexistent/memory.json"));
        let note = store.add("42", "temporary", NoteSource::Manual).await.unwrap();
        assert!(store.remove("42", &note.id).await);
        assert!(!store.remove("42", &note.id).await);
        assert!(store.notes("42").await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let store = MemoryStore::new(path.clone());
        store.add("42", "kept", NoteSource::Auto).await;
        store.save().await.unwrap();

        let reloaded = MemoryStore::load(path).await.unwrap();
        let notes = reloaded.notes("42").await;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "kept");
        assert_eq!(notes[0].source, NoteSource::Auto);
    }
}
