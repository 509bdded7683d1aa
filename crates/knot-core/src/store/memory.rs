use super::{matches_term, most_recent, LocalCache, NoteStore};
use crate::error::StoreError;
use crate::note::Note;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-process store keyed by note name. Serves as a remote stand-in and as a
/// session-scoped local cache.
#[derive(Default)]
pub struct MemoryStore {
    notes: DashMap<String, Note>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Note> {
        self.notes.get(name).map(|n| n.clone())
    }

    pub fn insert(&self, note: Note) {
        self.notes.insert(note.name.clone(), note);
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn recent(&self, limit: usize) -> Vec<String> {
        let snapshot: Vec<Note> = self.notes.iter().map(|e| e.value().clone()).collect();
        most_recent(snapshot.iter(), limit)
    }
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn fetch_note(&self, name: &str) -> Result<Option<Note>, StoreError> {
        Ok(self.get(name))
    }

    async fn persist_note(&self, note: &Note) -> Result<(), StoreError> {
        self.insert(note.clone());
        Ok(())
    }

    async fn set_public_flag(&self, name: &str, is_public: bool) -> Result<bool, StoreError> {
        match self.notes.get_mut(name) {
            Some(mut note) => {
                note.is_public = is_public;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn search(&self, term: &str) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .notes
            .iter()
            .filter(|e| matches_term(e.value(), term))
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

impl LocalCache for MemoryStore {
    fn cache_locally(&self, note: &Note) -> Result<(), StoreError> {
        self.insert(note.clone());
        Ok(())
    }

    fn read_local_cache(&self, name: &str) -> Result<Option<Note>, StoreError> {
        Ok(self.get(name))
    }
}
