use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hoard_blob::ReadResponse;
use serde::Serialize;
use serde_json::{json, Value};

use crate::HoardAxumError;

/// `{ "success": true, ...payload }`; non-object payloads land under `data`.
pub fn success<T: Serialize>(payload: T) -> Result<Json<Value>, HoardAxumError> {
    let value = serde_json::to_value(payload).map_err(anyhow::Error::from)?;
    let body = match value {
        Value::Object(mut map) => {
            map.insert("success".to_string(), Value::Bool(true));
            Value::Object(map)
        }
        Value::Null => json!({ "success": true }),
        other => json!({ "success": true, "data": other }),
    };
    Ok(Json(body))
}

/// Stream file content with the headers a media player needs for seeking.
pub fn content(read: ReadResponse) -> Response {
    let status = StatusCode::from_u16(read.status).unwrap_or(StatusCode::OK);
    let mime = mime_guess::from_path(&read.file_name).first_or_octet_stream();

    let mut response = (status, Body::from_stream(read.stream)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(read.content_length));
    if let Some(range) = read.content_range.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
        headers.insert(header::CONTENT_RANGE, range);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_merges_objects_and_wraps_scalars() {
        let Json(obj) = success(json!({"key": "image:a.png"})).unwrap();
        assert_eq!(obj, json!({"success": true, "key": "image:a.png"}));

        let Json(scalar) = success("ok").unwrap();
        assert_eq!(scalar, json!({"success": true, "data": "ok"}));

        let Json(unit) = success(()).unwrap();
        assert_eq!(unit, json!({"success": true}));
    }
}
