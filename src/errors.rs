/// Everything that can go wrong while resolving a rain zone.
///
/// `NoPrecipitation` and `PointNotEnclosed` are ordinary outcomes that callers
/// surface as "not raining". Transport, HTTP and decode failures mean the status
/// is unknown and must not be reported as dry.
#[derive(Debug, thiserror::Error)]
pub enum ZoneError {
    #[error("No grid points inside the requested bounding box")]
    NoGridPoints,

    #[error("No precipitation above the intensity floor")]
    NoPrecipitation,

    #[error("Target point is not enclosed by the precipitation contour")]
    PointNotEnclosed,

    #[error("Upstream returned HTTP {0}")]
    HttpError(u16),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ZoneError {
    /// Outcomes that mean "confirmed not raining" rather than a failure.
    pub fn is_not_raining(&self) -> bool {
        matches!(
            self,
            ZoneError::NoGridPoints | ZoneError::NoPrecipitation | ZoneError::PointNotEnclosed
        )
    }

    /// Failures where the weather status is unknown and a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ZoneError::HttpError(status) => *status == 429 || *status >= 500,
            ZoneError::TransportError(_) | ZoneError::DecodeError(_) | ZoneError::Database(_) => {
                true
            }
            ZoneError::NoGridPoints
            | ZoneError::NoPrecipitation
            | ZoneError::PointNotEnclosed
            | ZoneError::InvalidInput(_) => false,
        }
    }
}

impl From<reqwest::Error> for ZoneError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ZoneError::HttpError(status.as_u16()),
            None => ZoneError::TransportError(err.to_string()),
        }
    }
}

impl From<image::ImageError> for ZoneError {
    fn from(err: image::ImageError) -> Self {
        ZoneError::DecodeError(err.to_string())
    }
}
