use telemetry_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryWsError {
    #[error("unrecognized update message: {0}")]
    UnrecognizedMessage(String),
    #[error("malformed {kind} update: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("inbound frame is not json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode command batch: {0}")]
    Encode(#[source] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("subscriber already completed")]
    Completed,
}

pub type TelemetryWsResult<T> = Result<T, TelemetryWsError>;
