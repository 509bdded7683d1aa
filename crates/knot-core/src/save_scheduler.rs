use crate::backlinks::{apply_backlink_delta, diff_links};
use crate::error::StoreError;
use crate::note::{LastModified, Note};
use crate::store::{LocalCache, NoteStore, NoteStoreAdapter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

// ---------------------------------------------------------------------------
// State and events
// ---------------------------------------------------------------------------

/// Per-note save lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveState {
    #[default]
    Idle,
    PendingEdit,
    Saving,
    Saved,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved(DateTime<Utc>),
    Failed,
}

impl SaveOutcome {
    pub fn last_modified(&self) -> LastModified {
        match self {
            SaveOutcome::Saved(at) => LastModified::At(*at),
            SaveOutcome::Failed => LastModified::FailedToSave,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveEvent {
    pub name: String,
    pub outcome: SaveOutcome,
}

/// Where a settled note goes. Returns the timestamp the note was stored with.
#[async_trait]
pub trait SaveSink: Send + Sync {
    async fn save(&self, note: Note) -> Result<DateTime<Utc>, StoreError>;
}

// ---------------------------------------------------------------------------
// SaveScheduler
// ---------------------------------------------------------------------------

struct PendingSave {
    note: Note,
    last_edit: Instant,
}

pub struct SaveScheduler {
    debounce: Duration,
    pending: Arc<DashMap<String, PendingSave>>,
    states: DashMap<String, SaveState>,
    save_tx: mpsc::Sender<String>,
    events: broadcast::Sender<SaveEvent>,
}

impl SaveScheduler {
    pub fn new(debounce: Duration) -> (Self, mpsc::Receiver<String>) {
        let (save_tx, save_rx) = mpsc::channel(1000);
        let (events, _) = broadcast::channel(64);
        (
            Self {
                debounce,
                pending: Arc::new(DashMap::new()),
                states: DashMap::new(),
                save_tx,
                events,
            },
            save_rx,
        )
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn state(&self, name: &str) -> SaveState {
        self.states.get(name).map(|s| *s).unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SaveEvent> {
        self.events.subscribe()
    }

    /// Record an edit. The latest snapshot replaces any pending one and pushes
    /// the save deadline out; only the first edit of a burst queues the note.
    pub async fn on_edit(&self, note: Note) {
        use dashmap::mapref::entry::Entry;
        let name = note.name.clone();
        let is_new = match self.pending.entry(name.clone()) {
            Entry::Occupied(mut e) => {
                let pending = e.get_mut();
                pending.note = note;
                pending.last_edit = Instant::now();
                false
            }
            Entry::Vacant(e) => {
                e.insert(PendingSave {
                    note,
                    last_edit: Instant::now(),
                });
                true
            }
        };
        self.states.insert(name.clone(), SaveState::PendingEdit);

        if is_new {
            if let Err(e) = self.save_tx.send(name).await {
                tracing::error!(
                    "Save queue send failed (receiver dropped, worker dead?): {}",
                    e
                );
            }
        }
    }

    fn deadline(&self, name: &str) -> Option<Instant> {
        self.pending.get(name).map(|p| p.last_edit + self.debounce)
    }

    /// Drop the pending snapshot for `name`, returning it.
    pub fn cancel(&self, name: &str) -> Option<Note> {
        self.pending.remove(name).map(|(_, p)| p.note)
    }

    /// Save immediately, bypassing the debounce window. Any pending snapshot
    /// for the same note is discarded in favor of `note`.
    pub async fn save_now<S>(&self, note: Note, sink: &S) -> SaveOutcome
    where
        S: SaveSink + ?Sized,
    {
        self.cancel(&note.name);
        self.perform(note, sink).await
    }

    async fn perform<S>(&self, note: Note, sink: &S) -> SaveOutcome
    where
        S: SaveSink + ?Sized,
    {
        let name = note.name.clone();
        self.states.insert(name.clone(), SaveState::Saving);

        let outcome = match sink.save(note).await {
            Ok(at) => {
                tracing::info!("Saved note {}", name);
                SaveOutcome::Saved(at)
            }
            Err(e) => {
                tracing::error!("Failed to save note {}: {}", name, e);
                SaveOutcome::Failed
            }
        };

        // A newer edit arrived while saving; it owns the state now.
        if !self.pending.contains_key(&name) {
            let state = match outcome {
                SaveOutcome::Saved(_) => SaveState::Saved,
                SaveOutcome::Failed => SaveState::Failed,
            };
            self.states.insert(name.clone(), state);
        }

        let _ = self.events.send(SaveEvent { name, outcome });
        outcome
    }

    /// Background worker draining the save queue.
    ///
    /// Every queued note is held until `debounce` has passed since its last
    /// edit, then its latest snapshot goes to `sink`. The worker always sleeps
    /// toward the earliest deadline among queued notes, so a note that keeps
    /// being edited does not hold back the others. Saves run one at a time.
    pub async fn run_worker(self: Arc<Self>, mut rx: mpsc::Receiver<String>, sink: Arc<dyn SaveSink>) {
        tracing::info!("Save worker started (debounce {:?})", self.debounce);
        let mut queued: BTreeSet<String> = BTreeSet::new();
        let mut closed = false;

        loop {
            if queued.is_empty() {
                if closed {
                    break;
                }
                match rx.recv().await {
                    Some(name) => {
                        queued.insert(name);
                    }
                    None => break,
                }
            }
            while let Ok(name) = rx.try_recv() {
                queued.insert(name);
            }

            // notes saved directly via save_now have no pending entry left
            queued.retain(|name| self.pending.contains_key(name));
            let Some((name, deadline)) = queued
                .iter()
                .filter_map(|name| self.deadline(name).map(|d| (name.clone(), d)))
                .min_by_key(|(_, d)| *d)
            else {
                continue;
            };

            if Instant::now() < deadline {
                if closed {
                    tokio::time::sleep_until(deadline).await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => {}
                        msg = rx.recv() => match msg {
                            Some(name) => {
                                queued.insert(name);
                            }
                            None => closed = true,
                        },
                    }
                }
                // on_edit may have moved the deadline meanwhile; recompute
                continue;
            }

            queued.remove(&name);
            if let Some((_, pending)) = self.pending.remove(&name) {
                self.perform(pending.note, sink.as_ref()).await;
            }
        }
        tracing::info!("Save worker stopped");
    }
}

// ---------------------------------------------------------------------------
// SyncingSink
// ---------------------------------------------------------------------------

/// Which side keeps other notes' backlinks up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklinkMode {
    /// The client diffs links and updates other notes itself.
    Client,
    /// The backend does it on every write.
    #[default]
    Server,
}

pub struct SyncingSink<R, C> {
    adapter: Arc<NoteStoreAdapter<R, C>>,
    mode: BacklinkMode,
    stub_content: String,
}

impl<R, C> SyncingSink<R, C> {
    pub fn new(adapter: Arc<NoteStoreAdapter<R, C>>, mode: BacklinkMode, stub_content: impl Into<String>) -> Self {
        Self {
            adapter,
            mode,
            stub_content: stub_content.into(),
        }
    }
}

#[async_trait]
impl<R, C> SaveSink for SyncingSink<R, C>
where
    R: NoteStore + 'static,
    C: LocalCache + 'static,
{
    async fn save(&self, mut note: Note) -> Result<DateTime<Utc>, StoreError> {
        note.refresh_links();

        if self.mode == BacklinkMode::Client {
            let stored = self.adapter.fetch_note(&note.name).await;
            let old_links = stored.as_ref().map(|n| n.links.clone()).unwrap_or_default();
            if let Some(stored) = stored {
                note.backlinks = stored.backlinks;
            }

            let delta = diff_links(&old_links, &note.links);
            if !delta.is_empty() {
                let report =
                    apply_backlink_delta(&delta, &note.name, self.adapter.remote(), &self.stub_content).await;
                if !report.failed.is_empty() {
                    tracing::warn!("Backlink sync for {} incomplete: {:?}", note.name, report.failed);
                }
                // the record about to be written would otherwise undo a self-link update
                let own = note.name.clone();
                if delta.added.contains(&own) {
                    note.backlinks.insert(own.clone());
                }
                if delta.removed.contains(&own) {
                    note.backlinks.remove(&own);
                }
            }
        }

        self.adapter.persist_note(&note).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::FlakyStore;

    type TestAdapter = NoteStoreAdapter<FlakyStore, MemoryStore>;

    fn setup(debounce_ms: u64, mode: BacklinkMode) -> (Arc<SaveScheduler>, Arc<TestAdapter>, Arc<dyn SaveSink>) {
        let adapter = Arc::new(NoteStoreAdapter::new(FlakyStore::new(), MemoryStore::new()));
        let sink: Arc<dyn SaveSink> = Arc::new(SyncingSink::new(adapter.clone(), mode, "stub"));
        let (scheduler, rx) = SaveScheduler::new(Duration::from_millis(debounce_ms));
        let scheduler = Arc::new(scheduler);
        tokio::spawn(scheduler.clone().run_worker(rx, sink.clone()));
        (scheduler, adapter, sink)
    }

    fn edit(content: &str) -> Note {
        Note::new("N", content)
    }

    // === Debounce pipeline tests ===

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_persists_once_with_last_content() {
        let (scheduler, adapter, _sink) = setup(1000, BacklinkMode::Server);
        let start = Instant::now();

        scheduler.on_edit(edit("one")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.on_edit(edit("two")).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        scheduler.on_edit(edit("three")).await;

        tokio::time::sleep(Duration::from_millis(3000)).await;

        let persisted = adapter.remote().persisted();
        assert_eq!(persisted.len(), 1, "exactly one save for the burst");
        let (at, note) = &persisted[0];
        assert_eq!(note.content, "three");
        let elapsed = at.duration_since(start);
        assert!(
            elapsed >= Duration::from_millis(1400) && elapsed < Duration::from_millis(1450),
            "saved after {:?}",
            elapsed
        );
        assert_eq!(scheduler.state("N"), SaveState::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_pending_until_window_elapses() {
        let (scheduler, adapter, _sink) = setup(1000, BacklinkMode::Server);
        assert_eq!(scheduler.state("N"), SaveState::Idle);

        scheduler.on_edit(edit("x")).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.state("N"), SaveState::PendingEdit);
        assert!(adapter.remote().persisted().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(scheduler.state("N"), SaveState::Saved);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_after_save_starts_new_cycle() {
        let (scheduler, adapter, _sink) = setup(1000, BacklinkMode::Server);

        scheduler.on_edit(edit("first")).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        scheduler.on_edit(edit("second")).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let contents: Vec<String> = adapter.remote().persisted().into_iter().map(|(_, n)| n.content).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_marks_failed_and_keeps_content_locally() {
        let (scheduler, adapter, _sink) = setup(1000, BacklinkMode::Server);
        let mut events = scheduler.subscribe();
        adapter.remote().set_offline(true);

        scheduler.on_edit(edit("precious words")).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(scheduler.state("N"), SaveState::Failed);
        let event = events.recv().await.unwrap();
        assert_eq!(event.outcome, SaveOutcome::Failed);
        assert_eq!(event.outcome.last_modified(), LastModified::FailedToSave);
        assert_eq!(adapter.read_local_cache("N").unwrap().content, "precious words");
    }

    #[tokio::test(start_paused = true)]
    async fn save_now_skips_debounce_and_discards_pending() {
        let (scheduler, adapter, sink) = setup(1000, BacklinkMode::Server);

        scheduler.on_edit(edit("draft")).await;
        let outcome = scheduler.save_now(edit("final"), sink.as_ref()).await;
        assert!(matches!(outcome, SaveOutcome::Saved(_)));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        let contents: Vec<String> = adapter.remote().persisted().into_iter().map(|(_, n)| n.content).collect();
        assert_eq!(contents, vec!["final"]);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_note_does_not_hold_back_others() {
        let (scheduler, adapter, _sink) = setup(1000, BacklinkMode::Server);
        let start = Instant::now();

        scheduler.on_edit(Note::new("Busy", "0")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.on_edit(Note::new("Quiet", "once")).await;
        for i in 1..=5 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            scheduler.on_edit(Note::new("Busy", &i.to_string())).await;
        }
        tokio::time::sleep(Duration::from_millis(2000)).await;

        let persisted = adapter.remote().persisted();
        let saved_at = |name: &str| {
            persisted
                .iter()
                .find(|(_, n)| n.name == name)
                .map(|(at, n)| (at.duration_since(start), n.content.clone()))
                .unwrap()
        };
        let (quiet_at, _) = saved_at("Quiet");
        assert!(
            quiet_at >= Duration::from_millis(1100) && quiet_at < Duration::from_millis(1150),
            "quiet note saved after {:?}",
            quiet_at
        );
        let (busy_at, busy_content) = saved_at("Busy");
        assert_eq!(busy_content, "5");
        assert!(busy_at >= Duration::from_millis(3600), "busy note saved after {:?}", busy_at);
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn rapid_edits_queue_single_message() {
        let (scheduler, mut rx) = SaveScheduler::new(Duration::from_secs(1));
        scheduler.on_edit(edit("a")).await;
        scheduler.on_edit(edit("b")).await;
        scheduler.on_edit(edit("c")).await;

        assert!(rx.try_recv().is_ok(), "should have one message");
        assert!(rx.try_recv().is_err(), "should not have more messages");
        assert_eq!(scheduler.cancel("N").unwrap().content, "c");
    }

    // === SyncingSink ===

    #[tokio::test]
    async fn client_mode_syncs_backlinks_on_save() {
        let adapter = Arc::new(NoteStoreAdapter::new(FlakyStore::new(), MemoryStore::new()));
        let sink = SyncingSink::new(adapter.clone(), BacklinkMode::Client, "stub");
        adapter.remote().inner().insert(Note::new("N", "[[Old]]"));
        let mut old = Note::new("Old", "");
        old.backlinks.insert("N".into());
        adapter.remote().inner().insert(old);

        sink.save(Note::new("N", "now [[New]] and [[N]]")).await.unwrap();

        let remote = adapter.remote().inner();
        assert!(remote.get("Old").unwrap().backlinks.is_empty());
        assert_eq!(remote.get("New").unwrap().backlinks, BTreeSet::from(["N".to_string()]));
        assert_eq!(remote.get("New").unwrap().content, "stub");
        let saved = remote.get("N").unwrap();
        assert_eq!(saved.backlinks, BTreeSet::from(["N".to_string()]));
        assert_eq!(saved.links, BTreeSet::from(["N".to_string(), "New".to_string()]));
    }

    #[tokio::test]
    async fn server_mode_leaves_other_notes_alone() {
        let adapter = Arc::new(NoteStoreAdapter::new(FlakyStore::new(), MemoryStore::new()));
        let sink = SyncingSink::new(adapter.clone(), BacklinkMode::Server, "stub");

        sink.save(Note::new("N", "[[Elsewhere]]")).await.unwrap();

        assert!(adapter.remote().inner().get("Elsewhere").is_none());
        assert_eq!(adapter.remote().persist_attempts(), 1);
    }
}
