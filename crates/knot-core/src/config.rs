use crate::link_parser::LinkFormat;
use crate::save_scheduler::BacklinkMode;
use rand::seq::SliceRandom;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_CONTENT: &[&str] = &[
    "Nothing here yet.",
    "A blank page. Link it from somewhere with [[double brackets]].",
    "Start writing; it saves itself.",
];

fn default_debounce_ms() -> u64 {
    1500
}

fn default_recent_notes_limit() -> Option<usize> {
    Some(10)
}

fn default_content() -> Vec<String> {
    DEFAULT_CONTENT.iter().map(|s| s.to_string()).collect()
}

/// Editor behavior shared by the server and clients. Lives under `[editor]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Quiet period after the last edit before a save is sent.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Cap on `recent_notes`; `None` keeps the list unbounded.
    #[serde(default = "default_recent_notes_limit")]
    pub recent_notes_limit: Option<usize>,
    /// Candidate bodies for freshly created notes, one picked at random.
    #[serde(default = "default_content")]
    pub default_content: Vec<String>,
    pub link_format: LinkFormat,
    pub backlink_mode: BacklinkMode,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            recent_notes_limit: default_recent_notes_limit(),
            default_content: default_content(),
            link_format: LinkFormat::default(),
            backlink_mode: BacklinkMode::default(),
        }
    }
}

impl EditorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Body for a note that does not exist yet.
    pub fn pick_default_content(&self) -> String {
        self.default_content
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EditorConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(1500));
        assert_eq!(config.recent_notes_limit, Some(10));
        assert_eq!(config.link_format, LinkFormat::Notes);
        assert_eq!(config.backlink_mode, BacklinkMode::Server);
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let config: EditorConfig =
            serde_json::from_str(r#"{"debounce_ms": 250, "link_format": "hash", "backlink_mode": "client"}"#)
                .unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.link_format, LinkFormat::Hash);
        assert_eq!(config.backlink_mode, BacklinkMode::Client);
        assert_eq!(config.recent_notes_limit, Some(10));
        assert!(!config.default_content.is_empty());
    }

    #[test]
    fn default_content_comes_from_candidates() {
        let config = EditorConfig {
            default_content: vec!["only".into()],
            ..EditorConfig::default()
        };
        assert_eq!(config.pick_default_content(), "only");

        let empty = EditorConfig {
            default_content: vec![],
            ..EditorConfig::default()
        };
        assert_eq!(empty.pick_default_content(), "");
    }
}
