use crate::error::NoteParseError;
use crate::link_parser::{bare_names, extract_link_tokens};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const SAVING: &str = "saving";
pub const FAILED_TO_SAVE: &str = "failed to save";

/// Either the instant a note was last persisted or a transient save status.
///
/// On the wire this is a single string: an ISO-8601 instant, `"saving"`, or
/// `"failed to save"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LastModified {
    At(DateTime<Utc>),
    Saving,
    FailedToSave,
}

impl LastModified {
    pub fn now() -> Self {
        LastModified::At(Utc::now())
    }

    /// The instant, if this is not a status marker.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            LastModified::At(at) => Some(*at),
            _ => None,
        }
    }

    pub fn is_status(&self) -> bool {
        self.instant().is_none()
    }
}

impl Default for LastModified {
    /// Records without a timestamp sort as the oldest possible copy.
    fn default() -> Self {
        LastModified::At(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl fmt::Display for LastModified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastModified::At(at) => write!(f, "{}", at.to_rfc3339()),
            LastModified::Saving => f.write_str(SAVING),
            LastModified::FailedToSave => f.write_str(FAILED_TO_SAVE),
        }
    }
}

impl From<LastModified> for String {
    fn from(value: LastModified) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for LastModified {
    type Error = NoteParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for LastModified {
    type Err = NoteParseError;

    /// Accepts RFC 3339, RFC 2822 (`Tue, 01 Oct 2024 10:00:00 GMT`) and naive
    /// `YYYY-MM-DD HH:MM:SS[.f]` timestamps, the latter taken as UTC.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == SAVING {
            return Ok(LastModified::Saving);
        }
        if trimmed.starts_with(FAILED_TO_SAVE) {
            return Ok(LastModified::FailedToSave);
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(LastModified::At(at.with_timezone(&Utc)));
        }
        if let Ok(at) = DateTime::parse_from_rfc2822(trimmed) {
            return Ok(LastModified::At(at.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(LastModified::At(naive.and_utc()));
        }
        Err(NoteParseError(s.to_string()))
    }
}

/// A wiki note as stored and exchanged over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// Bare names referenced by `content`, recomputed by [`Note::refresh_links`].
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: BTreeSet<String>,
    /// Names of notes whose content links here.
    #[serde(default, deserialize_with = "null_as_default")]
    pub backlinks: BTreeSet<String>,
    #[serde(default)]
    pub last_modified: LastModified,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recent_notes: Vec<String>,
}

/// Older backends store empty lists as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Note {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let mut note = Note {
            name: name.into(),
            content: content.into(),
            links: BTreeSet::new(),
            backlinks: BTreeSet::new(),
            last_modified: LastModified::now(),
            is_public: false,
            recent_notes: Vec::new(),
        };
        note.refresh_links();
        note
    }

    /// A placeholder created when some other note links to `name` before it exists.
    pub fn stub(name: impl Into<String>, content: impl Into<String>, backlink: &str) -> Self {
        let mut note = Note::new(name, content);
        note.backlinks.insert(backlink.to_string());
        note
    }

    /// Recompute `links` from `content` and return the previous set.
    pub fn refresh_links(&mut self) -> BTreeSet<String> {
        let tokens = extract_link_tokens(&self.content);
        std::mem::replace(&mut self.links, bare_names(&tokens))
    }

    /// Move this note to the front of `recent_notes`, truncating to `cap` if given.
    pub fn touch_recent(&mut self, cap: Option<usize>) {
        let name = self.name.clone();
        self.recent_notes.retain(|n| *n != name);
        self.recent_notes.insert(0, name);
        if let Some(cap) = cap {
            self.recent_notes.truncate(cap.max(1));
        }
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.instant()
    }

    /// True when `self` carries a strictly later timestamp than `other`.
    /// A status marker never counts as newer.
    pub fn is_newer_than(&self, other: &Note) -> bool {
        match (self.modified_at(), other.modified_at()) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            _ => false,
        }
    }
}
