#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Request to {path} failed: {source}")]
    Request {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Unexpected template output: {0}")]
    Template(String),

    #[error("Invalid hub URL '{0}'")]
    InvalidUrl(String),

    #[error("No Home Assistant instance available")]
    Unavailable,
}

impl HubError {
    /// Whether the failure says the hub could not be reached at all, as
    /// opposed to the hub answering with an error.
    pub fn is_connectivity(&self) -> bool {
        match self {
            HubError::Request { source, .. } => source.is_connect() || source.is_timeout(),
            HubError::Unavailable => true,
            _ => false,
        }
    }
}
