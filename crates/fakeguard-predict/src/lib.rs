//! Request handling for the fakeguard predictor process.
//!
//! The process reads one JSON object from stdin and writes exactly one JSON
//! object to stdout: either a prediction or `{"error": message}`. Every
//! failure is turned into the error form so callers inspect the payload,
//! never the exit code.

use fakeguard_core::{FakeguardError, PipelineConfig, PredictionResult, Result};
use fakeguard_ml::{PredictRequest, Predictor};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// The single JSON object written to stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredictResponse {
    Prediction(PredictionResult),
    Error { error: String },
}

impl PredictResponse {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            error: message.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Serialize as one line of JSON.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"Failed to encode response: {e}"}}"#))
    }
}

impl From<Result<PredictionResult>> for PredictResponse {
    fn from(result: Result<PredictionResult>) -> Self {
        match result {
            Ok(prediction) => Self::Prediction(prediction),
            Err(e) => Self::error(e),
        }
    }
}

/// Parse and validate the raw stdin payload.
pub fn parse_request(raw: &str) -> Result<PredictRequest> {
    let request: PredictRequest = serde_json::from_str(raw)
        .map_err(|e| FakeguardError::Validation(format!("Invalid JSON input: {e}")))?;
    request.validate()?;
    Ok(request)
}

/// Answer one request with an already-constructed predictor.
pub async fn handle_request(raw: &str, predictor: &Predictor) -> PredictResponse {
    match parse_request(raw) {
        Ok(request) => predictor.predict(&request).await.into(),
        Err(e) => PredictResponse::error(e),
    }
}

/// Answer one request, loading the models only when the request is valid.
pub async fn serve_once(raw: &str, config: &PipelineConfig) -> PredictResponse {
    if let Err(e) = parse_request(raw) {
        return PredictResponse::error(e);
    }
    match Predictor::from_config(config).await {
        Ok(predictor) => handle_request(raw, &predictor).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialise predictor");
            PredictResponse::error(e)
        }
    }
}

/// Run `task` on its own tokio task so a panic anywhere below the boundary
/// still yields an error response.
pub async fn catch_panics<F>(task: F) -> PredictResponse
where
    F: Future<Output = PredictResponse> + Send + 'static,
{
    match tokio::spawn(task).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, "Prediction task did not complete");
            PredictResponse::error(format!("Unexpected error: {e}"))
        }
    }
}
