use thiserror::Error;

/// Failure talking to a note store (remote backend or local cache).
///
/// None of these are fatal to the editor: fetch failures are treated as
/// "note absent", persist failures turn into a `FailedToSave` status.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed note record: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0} from note backend")]
    Status(u16),

    #[error("invalid backend url: {0}")]
    Url(#[from] url::ParseError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failure decoding a `last_modified` value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized last_modified value: {0:?}")]
pub struct NoteParseError(pub String);
