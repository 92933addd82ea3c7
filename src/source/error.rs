use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest_middleware::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("No data published for {0}")]
    NotFound(String),

    #[error("Failed to parse JSON data from {0}")]
    JsonParse(String, #[source] serde_json::Error),

    #[error("Failed to read CSV data for station '{station}'")]
    CsvRead {
        station: String,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed data for station '{station}': {message}")]
    Malformed { station: String, message: String },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl SourceError {
    /// The provider has no data for the requested resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }

    /// The provider could not be reached or answered with a server error.
    pub fn is_unavailable(&self) -> bool {
        match self {
            SourceError::NetworkRequest(..) | SourceError::TaskJoin(_) => true,
            SourceError::HttpStatus { status, .. } => {
                status.is_server_error() || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}
