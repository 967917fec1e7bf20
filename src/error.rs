use thiserror::Error;

/// Errors produced at the boundary between TripDesk and the hosted backend.
///
/// Backend failures carry the service's own message so the web layer can
/// surface it verbatim next to the triggering form.
#[derive(Error, Debug)]
pub enum Error {
    #[error("The backend connection is not configured")]
    NotConfigured,

    #[error("{0}")]
    Backend(String),

    #[error("{0}")]
    UploadRejected(String),

    #[error("Row in table {0} could not be decoded: {1}")]
    BadRow(String, serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
