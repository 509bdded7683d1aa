use crate::note::{LastModified, Note};
use crate::store::NoteStore;
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// diff_links
// ---------------------------------------------------------------------------

/// Link-set change between two versions of a note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDelta {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl LinkDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Names present only in `new` are added, names present only in `old` are removed.
/// Empty names never take part in backlink mutation.
pub fn diff_links(old: &BTreeSet<String>, new: &BTreeSet<String>) -> LinkDelta {
    LinkDelta {
        added: new
            .difference(old)
            .filter(|name| !name.is_empty())
            .cloned()
            .collect(),
        removed: old
            .difference(new)
            .filter(|name| !name.is_empty())
            .cloned()
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// apply_backlink_delta
// ---------------------------------------------------------------------------

/// Outcome of one synchronization pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Existing notes whose backlinks were updated
    pub updated: Vec<String>,
    /// Stub notes created to hold a new backlink
    pub created: Vec<String>,
    /// Notes that could not be loaded or saved
    pub failed: Vec<String>,
}

/// Propagate `delta` of note `owner` to the backlinks of the referenced notes.
///
/// Removals on notes that do not exist are no-ops; additions to notes that do
/// not exist create a stub with `stub_content`. A failure on one name is
/// logged and recorded, and the remaining names are still processed.
pub async fn apply_backlink_delta<S>(
    delta: &LinkDelta,
    owner: &str,
    store: &S,
    stub_content: &str,
) -> SyncReport
where
    S: NoteStore + ?Sized,
{
    let mut report = SyncReport::default();

    for target in &delta.removed {
        let note = match store.fetch_note(target).await {
            Ok(Some(note)) => note,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Backlink removal {} -> {}: load failed: {}", owner, target, e);
                report.failed.push(target.clone());
                continue;
            }
        };
        if !note.backlinks.contains(owner) {
            continue;
        }
        let mut updated = note;
        updated.backlinks.remove(owner);
        updated.last_modified = LastModified::now();
        match store.persist_note(&updated).await {
            Ok(()) => report.updated.push(target.clone()),
            Err(e) => {
                tracing::warn!("Backlink removal {} -> {}: save failed: {}", owner, target, e);
                report.failed.push(target.clone());
            }
        }
    }

    for target in &delta.added {
        let (note, is_new) = match store.fetch_note(target).await {
            Ok(Some(mut note)) => {
                if !note.backlinks.insert(owner.to_string()) {
                    // already recorded, nothing to write
                    continue;
                }
                note.last_modified = LastModified::now();
                (note, false)
            }
            Ok(None) => (Note::stub(target.as_str(), stub_content, owner), true),
            Err(e) => {
                tracing::warn!("Backlink addition {} -> {}: load failed: {}", owner, target, e);
                report.failed.push(target.clone());
                continue;
            }
        };
        match store.persist_note(&note).await {
            Ok(()) if is_new => report.created.push(target.clone()),
            Ok(()) => report.updated.push(target.clone()),
            Err(e) => {
                tracing::warn!("Backlink addition {} -> {}: save failed: {}", owner, target, e);
                report.failed.push(target.clone());
            }
        }
    }

    tracing::debug!(
        "Backlinks for {}: {} updated, {} created, {} failed",
        owner,
        report.updated.len(),
        report.created.len(),
        report.failed.len()
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testing::FlakyStore;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // === diff_links ===

    #[test]
    fn diff_reports_added_and_removed() {
        let delta = diff_links(&set(&["a", "b"]), &set(&["b", "c"]));
        assert_eq!(delta.added, set(&["c"]));
        assert_eq!(delta.removed, set(&["a"]));
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let x = set(&["a", "b", "c"]);
        assert!(diff_links(&x, &x).is_empty());
        assert!(diff_links(&BTreeSet::new(), &BTreeSet::new()).is_empty());
    }

    #[test]
    fn diff_skips_empty_names() {
        let delta = diff_links(&set(&["", "a"]), &set(&["b"]));
        assert_eq!(delta.removed, set(&["a"]));
        let delta = diff_links(&set(&[]), &set(&["", "b"]));
        assert_eq!(delta.added, set(&["b"]));
    }

    // === apply_backlink_delta ===

    #[tokio::test]
    async fn adding_link_to_missing_note_creates_stub() {
        let store = MemoryStore::new();
        let delta = diff_links(&set(&[]), &set(&["M"]));

        let report = apply_backlink_delta(&delta, "N", &store, "stub").await;

        assert_eq!(report.created, vec!["M"]);
        let m = store.get("M").expect("stub should exist");
        assert_eq!(m.backlinks, set(&["N"]));
        assert_eq!(m.content, "stub");
    }

    #[tokio::test]
    async fn reapplying_delta_does_not_duplicate_backlink() {
        let store = MemoryStore::new();
        let delta = diff_links(&set(&[]), &set(&["M"]));

        apply_backlink_delta(&delta, "N", &store, "").await;
        let second = apply_backlink_delta(&delta, "N", &store, "").await;

        assert!(second.updated.is_empty() && second.created.is_empty());
        let m = store.get("M").unwrap();
        assert_eq!(m.backlinks.iter().filter(|b| *b == "N").count(), 1);
    }

    #[tokio::test]
    async fn adding_link_to_existing_note_keeps_content() {
        let store = MemoryStore::new();
        let mut m = Note::new("M", "hello");
        m.backlinks.insert("Other".into());
        store.insert(m);

        let report =
            apply_backlink_delta(&diff_links(&set(&[]), &set(&["M"])), "N", &store, "stub").await;

        assert_eq!(report.updated, vec!["M"]);
        let m = store.get("M").unwrap();
        assert_eq!(m.content, "hello");
        assert_eq!(m.backlinks, set(&["N", "Other"]));
    }

    #[tokio::test]
    async fn removing_link_drops_backlink() {
        let store = MemoryStore::new();
        let mut m = Note::new("M", "");
        m.backlinks.insert("N".into());
        store.insert(m);

        let report =
            apply_backlink_delta(&diff_links(&set(&["M"]), &set(&[])), "N", &store, "").await;

        assert_eq!(report.updated, vec!["M"]);
        assert!(store.get("M").unwrap().backlinks.is_empty());
    }

    #[tokio::test]
    async fn removing_link_from_missing_note_is_noop() {
        let store = MemoryStore::new();
        let report =
            apply_backlink_delta(&diff_links(&set(&["Ghost"]), &set(&[])), "N", &store, "").await;
        assert_eq!(report, SyncReport::default());
        assert!(store.get("Ghost").is_none());
    }

    #[tokio::test]
    async fn self_link_records_own_backlink() {
        let store = MemoryStore::new();
        store.insert(Note::new("N", "[[N]]"));
        apply_backlink_delta(&diff_links(&set(&[]), &set(&["N"])), "N", &store, "").await;
        assert_eq!(store.get("N").unwrap().backlinks, set(&["N"]));
    }

    #[tokio::test]
    async fn one_failing_note_does_not_stop_the_rest() {
        let store = FlakyStore::new();
        store.fail_on("B");
        let delta = diff_links(&set(&[]), &set(&["A", "B", "C"]));

        let report = apply_backlink_delta(&delta, "N", &store, "").await;

        assert_eq!(report.failed, vec!["B"]);
        assert_eq!(report.created, vec!["A", "C"]);
        assert!(store.inner().get("A").is_some());
        assert!(store.inner().get("B").is_none());
        assert!(store.inner().get("C").is_some());
    }
}
