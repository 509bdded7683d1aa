//! Note persistence contracts and the adapter the editor talks to.
//!
//! A deployment supplies a [`NoteStore`] (the source of truth, usually the
//! HTTP backend) and a [`LocalCache`] (offline side-store keyed by note name).
//! [`NoteStoreAdapter`] combines the two: fetch failures become "absent",
//! failed saves are staged in the cache, and the fresher of the two copies
//! wins on load.

pub mod directory;
pub mod http;
pub mod memory;

use crate::error::StoreError;
use crate::note::{LastModified, Note};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

pub use directory::DirectoryStore;
pub use http::HttpNoteStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// `Ok(None)` when the note does not exist.
    async fn fetch_note(&self, name: &str) -> Result<Option<Note>, StoreError>;

    /// Store the full record as given.
    async fn persist_note(&self, note: &Note) -> Result<(), StoreError>;

    /// Returns `false` when no note with that name exists.
    async fn set_public_flag(&self, name: &str, is_public: bool) -> Result<bool, StoreError>;

    /// Names of notes whose name or content contains `term`.
    async fn search(&self, term: &str) -> Result<Vec<String>, StoreError>;
}

pub trait LocalCache: Send + Sync {
    fn cache_locally(&self, note: &Note) -> Result<(), StoreError>;

    fn read_local_cache(&self, name: &str) -> Result<Option<Note>, StoreError>;
}

/// Case-insensitive substring match on name or content.
pub(crate) fn matches_term(note: &Note, term: &str) -> bool {
    let term = term.to_lowercase();
    note.name.to_lowercase().contains(&term) || note.content.to_lowercase().contains(&term)
}

/// Names of the most recently modified notes, newest first.
pub(crate) fn most_recent<'a>(notes: impl Iterator<Item = &'a Note>, limit: usize) -> Vec<String> {
    let mut dated: Vec<(Option<DateTime<Utc>>, &str)> =
        notes.map(|n| (n.modified_at(), n.name.as_str())).collect();
    dated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    dated.into_iter().take(limit).map(|(_, name)| name.to_string()).collect()
}

// ---------------------------------------------------------------------------
// NoteStoreAdapter
// ---------------------------------------------------------------------------

pub struct NoteStoreAdapter<R, C> {
    remote: R,
    cache: C,
}

impl<R: NoteStore, C: LocalCache> NoteStoreAdapter<R, C> {
    pub fn new(remote: R, cache: C) -> Self {
        Self { remote, cache }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Fetch from the remote store. Any failure is logged and reported as absent.
    pub async fn fetch_note(&self, name: &str) -> Option<Note> {
        match self.remote.fetch_note(name).await {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!("Fetching note {} failed, treating as absent: {}", name, e);
                None
            }
        }
    }

    pub fn read_local_cache(&self, name: &str) -> Option<Note> {
        match self.cache.read_local_cache(name) {
            Ok(note) => note,
            Err(e) => {
                tracing::warn!("Local cache entry for {} unreadable: {}", name, e);
                None
            }
        }
    }

    pub fn cache_locally(&self, note: &Note) {
        if let Err(e) = self.cache.cache_locally(note) {
            tracing::error!("Failed to cache note {} locally: {}", note.name, e);
        }
    }

    /// Load a note, preferring whichever of the cached and remote copies was
    /// modified more recently. A winning remote copy refreshes the cache.
    pub async fn load_freshest(&self, name: &str) -> Option<Note> {
        let local = self.read_local_cache(name);
        let remote = self.fetch_note(name).await;

        match (local, remote) {
            (Some(local), Some(remote)) => {
                if local.is_newer_than(&remote) {
                    tracing::info!("Using unsynced local copy of {}", name);
                    Some(local)
                } else {
                    self.cache_locally(&remote);
                    Some(remote)
                }
            }
            (Some(local), None) => Some(local),
            (None, Some(remote)) => {
                self.cache_locally(&remote);
                Some(remote)
            }
            (None, None) => None,
        }
    }

    /// Persist `note` stamped with the current time.
    ///
    /// On success returns the stamp. On failure the stamped note is written to
    /// the local cache so the edit survives, and the error is returned.
    pub async fn persist_note(&self, note: &Note) -> Result<DateTime<Utc>, StoreError> {
        let stamp = Utc::now();
        let mut stored = note.clone();
        stored.last_modified = LastModified::At(stamp);

        match self.remote.persist_note(&stored).await {
            Ok(()) => {
                self.cache_locally(&stored);
                Ok(stamp)
            }
            Err(e) => {
                tracing::warn!("Saving note {} failed, keeping local copy: {}", note.name, e);
                self.cache_locally(&stored);
                Err(e)
            }
        }
    }

    /// Side channel; a failure is only logged.
    pub async fn set_public_flag(&self, name: &str, is_public: bool) {
        match self.remote.set_public_flag(name, is_public).await {
            Ok(true) => tracing::info!("Note {} is_public={}", name, is_public),
            Ok(false) => tracing::warn!("Cannot change visibility of unknown note {}", name),
            Err(e) => tracing::warn!("Changing visibility of {} failed: {}", name, e),
        }
    }

    /// Cache the notes `note` links to, is linked from, or lists as recent,
    /// skipping ones that are already cached. Returns how many were fetched.
    pub async fn prefetch_related(&self, note: &Note) -> usize {
        let related: BTreeSet<&String> = note
            .links
            .iter()
            .chain(note.backlinks.iter())
            .chain(note.recent_notes.iter())
            .filter(|name| **name != note.name)
            .collect();

        let mut fetched = 0;
        for name in related {
            if self.read_local_cache(name).is_some() {
                continue;
            }
            if let Some(related_note) = self.fetch_note(name).await {
                self.cache_locally(&related_note);
                fetched += 1;
            }
        }
        tracing::debug!("Prefetched {} notes related to {}", fetched, note.name);
        fetched
    }

    pub async fn search(&self, term: &str) -> Vec<String> {
        match self.remote.search(term).await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Search for {:?} failed: {}", term, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyStore;
    use chrono::Duration;

    fn adapter() -> NoteStoreAdapter<FlakyStore, MemoryStore> {
        NoteStoreAdapter::new(FlakyStore::new(), MemoryStore::new())
    }

    fn dated(name: &str, content: &str, minutes_ago: i64) -> Note {
        let mut note = Note::new(name, content);
        note.last_modified = LastModified::At(Utc::now() - Duration::minutes(minutes_ago));
        note
    }

    #[tokio::test]
    async fn fetch_failure_is_absent() {
        let adapter = adapter();
        adapter.remote().inner().insert(Note::new("A", ""));
        adapter.remote().set_offline(true);
        assert!(adapter.fetch_note("A").await.is_none());
    }

    #[tokio::test]
    async fn failed_save_keeps_exact_content_in_cache() {
        let adapter = adapter();
        adapter.remote().set_offline(true);
        let note = Note::new("A", "unsaved words [[B]]");

        let result = adapter.persist_note(&note).await;

        assert!(result.is_err());
        let cached = adapter.read_local_cache("A").expect("cached copy");
        assert_eq!(cached.content, "unsaved words [[B]]");
        assert!(cached.modified_at().is_some());
    }

    #[tokio::test]
    async fn successful_save_stamps_note() {
        let adapter = adapter();
        let mut note = Note::new("A", "x");
        note.last_modified = LastModified::Saving;

        let stamp = adapter.persist_note(&note).await.unwrap();

        let stored = adapter.remote().inner().get("A").unwrap();
        assert_eq!(stored.last_modified, LastModified::At(stamp));
    }

    #[tokio::test]
    async fn newer_local_copy_wins() {
        let adapter = adapter();
        adapter.remote().inner().insert(dated("A", "remote", 10));
        adapter.cache().insert(dated("A", "local", 1));

        assert_eq!(adapter.load_freshest("A").await.unwrap().content, "local");
    }

    #[tokio::test]
    async fn newer_remote_copy_wins_and_refreshes_cache() {
        let adapter = adapter();
        adapter.remote().inner().insert(dated("A", "remote", 1));
        adapter.cache().insert(dated("A", "local", 10));

        assert_eq!(adapter.load_freshest("A").await.unwrap().content, "remote");
        assert_eq!(adapter.cache().get("A").unwrap().content, "remote");
    }

    #[tokio::test]
    async fn cached_copy_used_when_offline() {
        let adapter = adapter();
        adapter.cache().insert(dated("A", "local", 5));
        adapter.remote().set_offline(true);
        assert_eq!(adapter.load_freshest("A").await.unwrap().content, "local");
    }

    #[tokio::test]
    async fn prefetch_skips_cached_and_missing_notes() {
        let adapter = adapter();
        adapter.remote().inner().insert(Note::new("B", "b"));
        adapter.remote().inner().insert(Note::new("C", "c"));
        adapter.cache().insert(Note::new("C", "cached c"));

        let mut note = Note::new("A", "[[B]] [[C]] [[Missing]]");
        note.backlinks.insert("A".into());
        note.recent_notes = vec!["A".into(), "B".into()];

        assert_eq!(adapter.prefetch_related(&note).await, 1);
        assert_eq!(adapter.cache().get("B").unwrap().content, "b");
        assert_eq!(adapter.cache().get("C").unwrap().content, "cached c");
    }

    #[test]
    fn most_recent_orders_newest_first() {
        let notes = vec![dated("old", "", 30), dated("new", "", 1), dated("mid", "", 10)];
        assert_eq!(most_recent(notes.iter(), 2), vec!["new", "mid"]);
    }

    #[test]
    fn matches_term_is_case_insensitive() {
        let note = Note::new("Garden", "Tomatoes and basil");
        assert!(matches_term(&note, "garden"));
        assert!(matches_term(&note, "BASIL"));
        assert!(!matches_term(&note, "rose"));
    }
}
