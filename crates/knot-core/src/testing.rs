//! Store doubles shared by the unit tests.

use crate::error::StoreError;
use crate::note::Note;
use crate::store::{MemoryStore, NoteStore};
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// A [`MemoryStore`] that can go offline or fail on chosen names, and records
/// every successful persist.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: DashSet<String>,
    offline: AtomicBool,
    persist_attempts: AtomicUsize,
    persisted: Mutex<Vec<(Instant, Note)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_on(&self, name: &str) {
        self.failing.insert(name.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn persist_attempts(&self) -> usize {
        self.persist_attempts.load(Ordering::SeqCst)
    }

    /// Successful persists with the (tokio) instant they happened.
    pub fn persisted(&self) -> Vec<(Instant, Note)> {
        self.persisted.lock().unwrap().clone()
    }

    fn check(&self, name: &str) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) || self.failing.contains(name) {
            return Err(StoreError::Unavailable(format!("{} unreachable", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl NoteStore for FlakyStore {
    async fn fetch_note(&self, name: &str) -> Result<Option<Note>, StoreError> {
        self.check(name)?;
        self.inner.fetch_note(name).await
    }

    async fn persist_note(&self, note: &Note) -> Result<(), StoreError> {
        self.persist_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(&note.name)?;
        self.persisted.lock().unwrap().push((Instant::now(), note.clone()));
        self.inner.persist_note(note).await
    }

    async fn set_public_flag(&self, name: &str, is_public: bool) -> Result<bool, StoreError> {
        self.check(name)?;
        self.inner.set_public_flag(name, is_public).await
    }

    async fn search(&self, term: &str) -> Result<Vec<String>, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("search unreachable".into()));
        }
        self.inner.search(term).await
    }
}
