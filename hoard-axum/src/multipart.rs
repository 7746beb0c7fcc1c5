//! multipart/form-data field extraction for the upload routes.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{header, HeaderMap};
use bytes::Bytes;
use hoard_blob::{BackendCapabilities, BlobConfig};
use hoard_core::errors::HoardError;

/// Room for field headers and text fields around the file payload
const FORM_OVERHEAD: u64 = 64 * 1024;

/// Size ceilings applied while reading a form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Whole request body
    pub max_total_size: u64,
    /// Any single field
    pub max_field_size: u64,
}

impl MultipartLimits {
    /// Large enough for the biggest object the backend will take, and no
    /// larger than the biggest whole-file upload the config accepts.
    pub fn for_backend(config: &BlobConfig, caps: BackendCapabilities) -> Self {
        let max_field_size = caps
            .max_object_size
            .map_or(config.max_whole_file_bytes, |cap| cap.min(config.max_whole_file_bytes));
        Self {
            max_total_size: max_field_size.saturating_add(FORM_OVERHEAD),
            max_field_size,
        }
    }
}

/// One uploaded file field
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Text fields and file fields of a parsed form
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: Vec<FilePart>,
}

impl MultipartForm {
    /// Read the whole form into memory, enforcing `limits`.
    pub async fn parse(headers: &HeaderMap, body: Body, limits: MultipartLimits) -> Result<Self, HoardError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.starts_with("multipart/form-data") {
            return Err(HoardError::bad_request("Expected a multipart/form-data body"));
        }
        let boundary = multer::parse_boundary(content_type)
            .map_err(|e| HoardError::bad_request(format!("Invalid multipart boundary: {e}")))?;

        let constraints = multer::Constraints::new().size_limit(
            multer::SizeLimit::new()
                .whole_stream(limits.max_total_size)
                .per_field(limits.max_field_size),
        );
        let mut multipart = multer::Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let mut form = MultipartForm::default();
        while let Some(field) = multipart.next_field().await.map_err(map_multer_error)? {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(|m| m.to_string());

            if file_name.is_some() {
                let data = field.bytes().await.map_err(map_multer_error)?;
                form.files.push(FilePart {
                    field: name,
                    file_name,
                    content_type,
                    data,
                });
            } else {
                let text = field.text().await.map_err(map_multer_error)?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn require_text(&self, name: &str) -> Result<&str, HoardError> {
        self.text(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| HoardError::bad_request(format!("Missing field: {name}")))
    }

    /// Remove and return the file sent under `name`.
    pub fn take_file(&mut self, name: &str) -> Option<FilePart> {
        let position = self.files.iter().position(|f| f.field == name)?;
        Some(self.files.remove(position))
    }

    /// Remove and return the first file, whatever its field name.
    pub fn take_any_file(&mut self) -> Option<FilePart> {
        (!self.files.is_empty()).then(|| self.files.remove(0))
    }
}

fn map_multer_error(e: multer::Error) -> HoardError {
    match e {
        multer::Error::StreamSizeExceeded { limit } => {
            HoardError::payload_too_large(format!("Request body exceeds {limit} bytes"))
        }
        multer::Error::FieldSizeExceeded { limit, field_name } => HoardError::payload_too_large(format!(
            "Field {} exceeds {limit} bytes",
            field_name.unwrap_or_default()
        )),
        other => HoardError::bad_request(format!("Failed to parse multipart data: {other}")),
    }
}
