use thiserror::Error;

#[derive(Error, Debug)]
pub enum GleanerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crawl of '{source}' failed: {cause}")]
    Crawl {
        source: String,
        #[source]
        cause: Box<GleanerError>,
    },

    #[error("{0}")]
    Other(String),
}

impl GleanerError {
    /// Wrap an error with the identity of the source whose crawl it aborted.
    pub fn for_source(source: &str, cause: GleanerError) -> Self {
        GleanerError::Crawl {
            source: source.to_string(),
            cause: Box::new(cause),
        }
    }
}

pub type Result<T> = std::result::Result<T, GleanerError>;
