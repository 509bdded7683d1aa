use super::NoteStore;
use crate::error::StoreError;
use crate::note::Note;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Serialize)]
struct PublicStatus {
    is_public: bool,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

/// Client for a knot backend:
///
/// - `GET  /notes/{name}?json=true`
/// - `PUT  /{name}`
/// - `PUT  /public/{name}`
/// - `GET  /search/{term}`
#[derive(Debug, Clone)]
pub struct HttpNoteStore {
    base: Url,
    client: Client,
}

impl HttpNoteStore {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        Ok(Self::with_client(Url::parse(base_url)?, Client::new()))
    }

    pub fn with_client(base: Url, client: Client) -> Self {
        Self { base, client }
    }

    /// Base url with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Unavailable(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl NoteStore for HttpNoteStore {
    async fn fetch_note(&self, name: &str) -> Result<Option<Note>, StoreError> {
        let mut url = self.endpoint(&["notes", name])?;
        url.query_pairs_mut().append_pair("json", "true");

        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            tracing::debug!("GET note {} returned {}", name, response.status());
            return Ok(None);
        }
        Ok(Some(response.json::<Note>().await?))
    }

    async fn persist_note(&self, note: &Note) -> Result<(), StoreError> {
        let url = self.endpoint(&[&note.name])?;
        let response = self.client.put(url).json(note).send().await?;
        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(StoreError::Status(status.as_u16())),
        }
    }

    async fn set_public_flag(&self, name: &str, is_public: bool) -> Result<bool, StoreError> {
        let url = self.endpoint(&["public", name])?;
        let response = self
            .client
            .put(url)
            .json(&PublicStatus { is_public })
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        Ok(response.json::<MessageResponse>().await?.message == "success")
    }

    async fn search(&self, term: &str) -> Result<Vec<String>, StoreError> {
        let url = self.endpoint(&["search", term])?;
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(response.json::<Vec<String>>().await?),
            status => Err(StoreError::Status(status.as_u16())),
        }
    }
}
