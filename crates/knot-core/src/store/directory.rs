use super::{matches_term, most_recent, LocalCache, NoteStore};
use crate::error::StoreError;
use crate::note::Note;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One JSON file per note, named by the percent-encoded note name.
///
/// Backs the server's note collection and doubles as a client's persistent
/// local cache.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        tracing::info!("Note directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", urlencoding::encode(name)))
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<Note, StoreError> {
        serde_json::from_slice(bytes).map_err(|e| {
            tracing::warn!("Note file for {} is malformed: {}", name, e);
            StoreError::from(e)
        })
    }

    /// Every readable note in the directory. Malformed files are skipped.
    pub async fn list_notes(&self) -> Result<Vec<Note>, StoreError> {
        let mut notes = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Note>(&bytes) {
                Ok(note) => notes.push(note),
                Err(e) => tracing::warn!("Skipping malformed note file {}: {}", path.display(), e),
            }
        }
        Ok(notes)
    }

    /// Names of the most recently modified notes, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let notes = self.list_notes().await?;
        Ok(most_recent(notes.iter(), limit))
    }
}

#[async_trait]
impl NoteStore for DirectoryStore {
    async fn fetch_note(&self, name: &str) -> Result<Option<Note>, StoreError> {
        match tokio::fs::read(self.path_for(name)).await {
            Ok(bytes) => Ok(Some(Self::decode(name, &bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist_note(&self, note: &Note) -> Result<(), StoreError> {
        let path = self.path_for(&note.name);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(note)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn set_public_flag(&self, name: &str, is_public: bool) -> Result<bool, StoreError> {
        let Some(mut note) = self.fetch_note(name).await? else {
            return Ok(false);
        };
        note.is_public = is_public;
        self.persist_note(&note).await?;
        Ok(true)
    }

    async fn search(&self, term: &str) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .list_notes()
            .await?
            .into_iter()
            .filter(|n| matches_term(n, term))
            .map(|n| n.name)
            .collect();
        names.sort();
        Ok(names)
    }
}

impl LocalCache for DirectoryStore {
    fn cache_locally(&self, note: &Note) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(note)?;
        std::fs::write(self.path_for(&note.name), bytes)?;
        Ok(())
    }

    fn read_local_cache(&self, name: &str) -> Result<Option<Note>, StoreError> {
        match std::fs::read(self.path_for(name)) {
            Ok(bytes) => Ok(Some(Self::decode(name, &bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
