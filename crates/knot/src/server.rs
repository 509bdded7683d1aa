use crate::config::Config;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, put},
    Json, Router,
};
use knot_core::backlinks::{apply_backlink_delta, diff_links};
use knot_core::render::{describe_last_modified, render_markdown_html, PulldownConverter};
use knot_core::{BacklinkMode, DirectoryStore, LastModified, LinkFormat, Note, NoteStore};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::Mutex;

type HandlerError = (StatusCode, String);

fn internal(e: impl Display) -> HandlerError {
    tracing::error!("Request failed: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

pub struct AppState {
    store: DirectoryStore,
    config: Config,
    /// Serializes writes; backlink sync is read-modify-write across notes.
    write_lock: Mutex<()>,
}

impl AppState {
    pub fn new(store: DirectoryStore, config: Config) -> Self {
        Self {
            store,
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn open(config: Config) -> anyhow::Result<Self> {
        let store = DirectoryStore::open(&config.store.data_dir)?;
        Ok(Self::new(store, config))
    }

    pub fn store(&self) -> &DirectoryStore {
        &self.store
    }

    fn recent_limit(&self) -> usize {
        self.config.editor.recent_notes_limit.unwrap_or(usize::MAX)
    }

    /// Load `name`, creating it with default content on first visit, and fill
    /// in `recent_notes`.
    async fn load_or_create(&self, name: &str) -> Result<Note, HandlerError> {
        let mut note = match self.store.fetch_note(name).await.map_err(internal)? {
            Some(note) => note,
            None => {
                let _guard = self.write_lock.lock().await;
                match self.store.fetch_note(name).await.map_err(internal)? {
                    Some(note) => note,
                    None => {
                        let note = Note::new(name, self.config.editor.pick_default_content());
                        self.store.persist_note(&note).await.map_err(internal)?;
                        tracing::info!("Created note {}", name);
                        note
                    }
                }
            }
        };
        note.recent_notes = self.store.recent(self.recent_limit()).await.map_err(internal)?;
        note.touch_recent(self.config.editor.recent_notes_limit);
        Ok(note)
    }
}

#[derive(Deserialize)]
struct NoteQuery {
    json: Option<String>,
}

impl NoteQuery {
    /// `?json`, `?json=true` and friends; only an explicit `false` opts out.
    fn wants_json(&self) -> bool {
        self.json.as_deref().is_some_and(|v| v != "false")
    }
}

#[derive(Serialize, Deserialize)]
struct PublicStatus {
    is_public: bool,
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

const SUCCESS: Message = Message { message: "success" };
const FAILED: Message = Message { message: "failed" };

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/notes/:name", get(get_note))
        .route("/public/:name", get(get_public_note).put(put_public_flag))
        .route("/search/:term", get(search))
        .route("/:name", put(put_note))
        .with_state(state)
}

async fn index() -> Redirect {
    let today = chrono::Local::now().format("%Y-%m-%d");
    Redirect::temporary(&format!("/notes/{}", today))
}

async fn get_note(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NoteQuery>,
) -> Result<Response, HandlerError> {
    let note = state.load_or_create(&name).await?;
    if query.wants_json() {
        return Ok(Json(note).into_response());
    }
    Ok(Html(render_page(&note, state.config.editor.link_format)).into_response())
}

async fn get_public_note(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<NoteQuery>,
) -> Result<Response, HandlerError> {
    let note = match state.store.fetch_note(&name).await.map_err(internal)? {
        Some(note) if note.is_public => note,
        _ => return Err((StatusCode::NOT_FOUND, format!("No public note named {}", name))),
    };
    if query.wants_json() {
        return Ok(Json(note).into_response());
    }
    Ok(Html(render_page(&note, LinkFormat::Public)).into_response())
}

async fn put_note(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(mut note): Json<Note>,
) -> Result<Json<Message>, HandlerError> {
    let _guard = state.write_lock.lock().await;

    note.name = name;
    note.refresh_links();
    // derived on read
    note.recent_notes.clear();

    if state.config.editor.backlink_mode == BacklinkMode::Server {
        let previous = state.store.fetch_note(&note.name).await.map_err(internal)?;
        let old_links = previous.map(|p| p.links).unwrap_or_default();

        let delta = diff_links(&old_links, &note.links);
        if !delta.is_empty() {
            let stub = state.config.editor.pick_default_content();
            let report = apply_backlink_delta(&delta, &note.name, &state.store, &stub).await;
            tracing::debug!("Backlinks of {}: {:?}", note.name, report);
        }

        // this note's own backlinks belong to the other notes' writes
        note.backlinks = match state.store.fetch_note(&note.name).await.map_err(internal)? {
            Some(stored) => stored.backlinks,
            None => Default::default(),
        };
    }

    note.last_modified = LastModified::now();
    state.store.persist_note(&note).await.map_err(internal)?;
    tracing::info!("Saved note {}", note.name);
    Ok(Json(SUCCESS))
}

async fn put_public_flag(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(status): Json<PublicStatus>,
) -> Json<Message> {
    let _guard = state.write_lock.lock().await;
    match state.store.set_public_flag(&name, status.is_public).await {
        Ok(true) => {
            tracing::info!("Note {} is_public={}", name, status.is_public);
            Json(SUCCESS)
        }
        Ok(false) => Json(FAILED),
        Err(e) => {
            tracing::warn!("Changing visibility of {} failed: {}", name, e);
            Json(FAILED)
        }
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    Path(term): Path<String>,
) -> Result<Json<Vec<String>>, HandlerError> {
    Ok(Json(state.store.search(&term).await.map_err(internal)?))
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    // writing into a String cannot fail
    let _ = pulldown_cmark_escape::escape_html(&mut out, raw);
    out
}

/// Markdown listing `names` as wiki links, or nothing.
fn link_list(title: &str, names: &[&String]) -> String {
    if names.is_empty() {
        return String::new();
    }
    let mut md = format!("\n\n### {}\n\n", title);
    for name in names {
        md.push_str(&format!("- [[{}]]\n", name));
    }
    md
}

/// Standalone read-only page for a note.
pub fn render_page(note: &Note, format: LinkFormat) -> String {
    let backlinks: Vec<&String> = note.backlinks.iter().filter(|b| **b != note.name).collect();
    let recent: Vec<&String> = note.recent_notes.iter().filter(|r| **r != note.name).collect();

    let body = render_markdown_html(&note.content, &PulldownConverter, format);
    let aside = render_markdown_html(
        &format!("{}{}", link_list("Backlinks", &backlinks), link_list("Recent", &recent)),
        &PulldownConverter,
        format,
    );
    let status = describe_last_modified(&note.last_modified, chrono::Utc::now());

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n<body>\n\
         <h1>{title}</h1>\n<p class=\"status\">{status}</p>\n<main>\n{body}</main>\n<aside>\n{aside}</aside>\n\
         </body>\n</html>\n",
        title = escape_html(&note.name),
        status = escape_html(&status),
        body = body,
        aside = aside,
    )
}
