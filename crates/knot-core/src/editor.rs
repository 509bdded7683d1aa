//! Editor session state as an explicit value.
//!
//! [`update`] is a pure reducer: it takes the current [`EditorState`] and an
//! [`Action`] and returns the next state plus the [`Effect`]s to run.
//! [`Editor`] owns a state and carries effects out against the store adapter,
//! the save scheduler and a markdown converter.

use crate::config::EditorConfig;
use crate::link_parser::LinkFormat;
use crate::note::{LastModified, Note};
use crate::render::{render_markdown_html, MarkdownConverter};
use crate::save_scheduler::{SaveEvent, SaveScheduler, SaveSink, SaveState};
use crate::store::{LocalCache, NoteStore, NoteStoreAdapter};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    View,
    Edit,
}

/// Side-panel inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Add,
    Search,
}

impl ControlKind {
    /// DOM id of the input that takes focus when the control opens.
    pub fn focus_id(&self) -> &'static str {
        match self {
            ControlKind::Add => "new-input",
            ControlKind::Search => "search-input",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditorState {
    /// Name of the note being shown.
    pub route: String,
    pub view: ViewMode,
    pub note: Option<Note>,
    /// Byte offset of the cursor in the editing buffer.
    pub cursor: usize,
    pub show_left: bool,
    pub show_right: bool,
    pub active_control: Option<ControlKind>,
    pub search_links: Vec<String>,
    /// Cap on a note's recent-notes list; `None` keeps it unbounded.
    pub recent_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// A copy of the routed note became available (typically the local cache).
    Loaded(Note),
    /// The remote copy arrived; it replaces the current one only if newer.
    Revalidated(Note),
    UpdateContent { content: String, cursor: usize },
    Edit,
    View,
    SetStatus(LastModified),
    TogglePublic,
    Navigate(String),
    ToggleLeft,
    ToggleRight,
    OpenControl(ControlKind),
    Search(String),
    SearchResults(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RenderMarkdown(String),
    ScheduleSave(Note),
    SaveNow(Note),
    SetPublic { name: String, is_public: bool },
    LoadNote(String),
    /// Warm the local cache with the notes linked from and to this one.
    Prefetch(Note),
    Search(String),
    Focus(&'static str),
}

/// Whether `incoming` should replace what the editor currently shows.
fn should_replace(current: Option<&Note>, incoming: &Note) -> bool {
    let Some(current) = current else {
        return true;
    };
    if current.name != incoming.name {
        return true;
    }
    // unsaved edits in flight are never clobbered by a revalidation
    current.modified_at().is_some() && incoming.is_newer_than(current)
}

/// Apply `action` to `state`. `now` stamps notes saved on leaving edit mode.
pub fn update(mut state: EditorState, action: Action, now: DateTime<Utc>) -> (EditorState, Vec<Effect>) {
    let mut effects = Vec::new();

    match action {
        Action::Loaded(note) => {
            if note.name == state.route || state.route.is_empty() {
                state.route = note.name.clone();
                effects.push(Effect::RenderMarkdown(note.content.clone()));
                state.note = Some(note);
            }
        }
        Action::Revalidated(note) => {
            if note.name == state.route {
                if should_replace(state.note.as_ref(), &note) {
                    effects.push(Effect::RenderMarkdown(note.content.clone()));
                    state.note = Some(note);
                }
                if let Some(current) = &state.note {
                    effects.push(Effect::Prefetch(current.clone()));
                }
            }
        }
        Action::UpdateContent { content, cursor } => {
            if let Some(note) = state.note.as_mut() {
                note.content = content;
                note.refresh_links();
                note.last_modified = LastModified::Saving;
                note.touch_recent(state.recent_limit);
                state.cursor = cursor;
                effects.push(Effect::ScheduleSave(note.clone()));
            }
        }
        Action::Edit => {
            if state.note.is_some() {
                state.view = ViewMode::Edit;
            }
        }
        Action::View => {
            state.view = ViewMode::View;
            if let Some(note) = state.note.as_mut() {
                note.last_modified = LastModified::At(now);
                note.refresh_links();
                note.touch_recent(state.recent_limit);
                effects.push(Effect::RenderMarkdown(note.content.clone()));
                effects.push(Effect::SaveNow(note.clone()));
            }
        }
        Action::SetStatus(status) => {
            if let Some(note) = state.note.as_mut() {
                note.last_modified = status;
                note.touch_recent(state.recent_limit);
            }
        }
        Action::TogglePublic => {
            if let Some(note) = state.note.as_mut() {
                note.is_public = !note.is_public;
                effects.push(Effect::SetPublic {
                    name: note.name.clone(),
                    is_public: note.is_public,
                });
            }
        }
        Action::Navigate(name) => {
            if name != state.route || state.note.is_none() {
                state.route = name.clone();
                state.note = None;
                state.view = ViewMode::View;
                state.cursor = 0;
                effects.push(Effect::LoadNote(name));
            }
        }
        Action::ToggleLeft => state.show_left = !state.show_left,
        Action::ToggleRight => state.show_right = !state.show_right,
        Action::OpenControl(kind) => {
            state.show_left = true;
            state.active_control = Some(kind);
            effects.push(Effect::Focus(kind.focus_id()));
        }
        Action::Search(term) => {
            if !term.is_empty() {
                effects.push(Effect::Search(term));
            }
        }
        Action::SearchResults(names) => state.search_links = names,
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Editor
// ---------------------------------------------------------------------------

pub struct Editor<R, C> {
    state: EditorState,
    adapter: Arc<NoteStoreAdapter<R, C>>,
    scheduler: Arc<SaveScheduler>,
    saves: broadcast::Receiver<SaveEvent>,
    sink: Arc<dyn SaveSink>,
    converter: Arc<dyn MarkdownConverter>,
    link_format: LinkFormat,
    rendered: String,
    focused: Option<&'static str>,
}

impl<R: NoteStore, C: LocalCache> Editor<R, C> {
    pub fn new(
        adapter: Arc<NoteStoreAdapter<R, C>>,
        scheduler: Arc<SaveScheduler>,
        sink: Arc<dyn SaveSink>,
        converter: Arc<dyn MarkdownConverter>,
        config: &EditorConfig,
    ) -> Self {
        let saves = scheduler.subscribe();
        Self {
            state: EditorState {
                recent_limit: config.recent_notes_limit,
                ..EditorState::default()
            },
            adapter,
            scheduler,
            saves,
            sink,
            converter,
            link_format: config.link_format,
            rendered: String::new(),
            focused: None,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    /// HTML of the last rendered note.
    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    pub fn focused(&self) -> Option<&'static str> {
        self.focused
    }

    /// Apply `action` and run its effects, including any actions they produce.
    pub async fn dispatch(&mut self, action: Action) {
        let mut queue = VecDeque::from([action]);
        while let Some(action) = queue.pop_front() {
            let state = std::mem::take(&mut self.state);
            let (next, effects) = update(state, action, Utc::now());
            self.state = next;
            for effect in effects {
                queue.extend(self.run(effect).await);
            }
        }
    }

    /// Apply every save outcome the scheduler has reported so far.
    /// Returns how many events were read.
    pub async fn poll_saves(&mut self) -> usize {
        let mut seen = 0;
        loop {
            match self.saves.try_recv() {
                Ok(event) => {
                    seen += 1;
                    self.apply_save_event(event).await;
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Editor missed {} save events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return seen,
            }
        }
    }

    /// Wait for the next save outcome and apply it.
    pub async fn next_save_event(&mut self) -> Option<SaveEvent> {
        loop {
            match self.saves.recv().await {
                Ok(event) => {
                    self.apply_save_event(event.clone()).await;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Editor missed {} save events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn apply_save_event(&mut self, event: SaveEvent) {
        if event.name != self.state.route {
            return;
        }
        // a newer edit is already pending or in flight; its outcome will follow
        if !matches!(self.scheduler.state(&event.name), SaveState::Saved | SaveState::Failed) {
            return;
        }
        self.dispatch(Action::SetStatus(event.outcome.last_modified())).await;
    }

    async fn run(&mut self, effect: Effect) -> Vec<Action> {
        match effect {
            Effect::RenderMarkdown(content) => {
                self.rendered = render_markdown_html(&content, self.converter.as_ref(), self.link_format);
                vec![]
            }
            Effect::ScheduleSave(note) => {
                self.scheduler.on_edit(note).await;
                vec![]
            }
            Effect::SaveNow(note) => {
                let outcome = self.scheduler.save_now(note, self.sink.as_ref()).await;
                vec![Action::SetStatus(outcome.last_modified())]
            }
            Effect::SetPublic { name, is_public } => {
                self.adapter.set_public_flag(&name, is_public).await;
                vec![]
            }
            Effect::LoadNote(name) => self.load(&name).await,
            Effect::Prefetch(note) => {
                self.adapter.prefetch_related(&note).await;
                vec![]
            }
            Effect::Search(term) => vec![Action::SearchResults(self.adapter.search(&term).await)],
            Effect::Focus(id) => {
                self.focused = Some(id);
                vec![]
            }
        }
    }

    /// Cached copy first, then whichever of cached and remote is newer.
    async fn load(&self, name: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(local) = self.adapter.read_local_cache(name) {
            actions.push(Action::Loaded(local));
        }
        match self.adapter.load_freshest(name).await {
            Some(freshest) => actions.push(Action::Revalidated(freshest)),
            None => tracing::warn!("Note {} is neither cached nor reachable", name),
        }
        actions
    }
}
