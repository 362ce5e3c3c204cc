use thiserror::Error;

/// Internal fault taxonomy. These never cross the public geocode boundary:
/// provider clients and the orchestrator translate them into status-tagged
/// `GeocodeResult`s. They surface directly only from construction-time
/// operations (config load, cache open).
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache store error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, GeoError>;
