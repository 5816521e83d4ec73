use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("could not fetch markup for {address}: {reason}")]
    Fetch { address: String, reason: String },

    #[error("no content: {0}")]
    NoContent(String),

    #[error("could not download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("could not parse {0}")]
    Parse(String),

    #[error("opening {0} was superseded by a newer navigation")]
    Superseded(String),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Library(#[from] LibraryError),
}

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("library io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("library file is not valid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("library database error: {0}")]
    Sql(#[from] sqlx::Error),
}
