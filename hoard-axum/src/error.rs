use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hoard_blob::BlobError;
use hoard_core::errors::HoardError;
use tracing::error;

#[derive(Debug)]
pub struct HoardAxumError(pub anyhow::Error);

impl From<anyhow::Error> for HoardAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<BlobError> for HoardAxumError {
    fn from(e: BlobError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

impl From<HoardError> for HoardAxumError {
    fn from(e: HoardError) -> Self {
        Self(e.into_anyhow())
    }
}

/// Translate a storage failure into its client-facing class.
pub fn blob_to_hoard(err: &BlobError) -> HoardError {
    match err {
        BlobError::NotFound { .. } => HoardError::not_found(err.to_string()),
        BlobError::InvalidRange { .. } => HoardError::range_not_satisfiable(err.to_string()),
        BlobError::IncompleteUpload { .. } => HoardError::too_early(err.to_string()),
        BlobError::SizeLimitExceeded { .. } | BlobError::Invalid { .. } => HoardError::bad_request(err.to_string()),
        BlobError::Conflict { .. } => HoardError::conflict(err.to_string()),
        BlobError::Unsupported => HoardError::not_implemented(err.to_string()),
        BlobError::BackendUploadFailure { .. }
        | BlobError::BackendReadFailure { .. }
        | BlobError::Backend { .. }
        | BlobError::Timeout { .. }
        | BlobError::Io { .. }
        | BlobError::Serialization { .. } => HoardError::general_error(err.to_string()),
    }
}

impl IntoResponse for HoardAxumError {
    fn into_response(self) -> Response {
        let hoard = if let Some(hoard) = HoardError::find_in(&self.0) {
            hoard.sanitize_for_client()
        } else if let Some(blob) = self.0.chain().find_map(|e| e.downcast_ref::<BlobError>()) {
            blob_to_hoard(blob)
        } else {
            HoardError::general_error(self.0.to_string())
        };

        if hoard.is_server_error() {
            error!("Request failed: {:#}", self.0);
        }

        let status = StatusCode::from_u16(hoard.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(hoard.to_json())).into_response()
    }
}
