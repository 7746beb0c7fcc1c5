//! Structured errors for the hoard HTTP surface.
//!
//! A [`HoardError`] travels inside `anyhow::Error` and is recovered by a
//! downcast at the edge, where it renders as
//! `{ "success": false, "message", "name", "code", "className" }`.

use std::fmt;

use anyhow::Error as AnyError;
use serde_json::{json, Value};

pub type HoardResult<T> = std::result::Result<T, AnyError>;

/// Failure classes a client can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    PayloadTooLarge,
    RangeNotSatisfiable,
    TooEarly,
    GeneralError,
    NotImplemented,
}

impl ErrorKind {
    /// `(status, name, className)`
    const fn describe(self) -> (u16, &'static str, &'static str) {
        match self {
            ErrorKind::BadRequest => (400, "BadRequest", "bad-request"),
            ErrorKind::NotFound => (404, "NotFound", "not-found"),
            ErrorKind::Conflict => (409, "Conflict", "conflict"),
            ErrorKind::PayloadTooLarge => (413, "PayloadTooLarge", "payload-too-large"),
            ErrorKind::RangeNotSatisfiable => (416, "RangeNotSatisfiable", "range-not-satisfiable"),
            ErrorKind::TooEarly => (425, "TooEarly", "too-early"),
            ErrorKind::GeneralError => (500, "GeneralError", "general-error"),
            ErrorKind::NotImplemented => (501, "NotImplemented", "not-implemented"),
        }
    }

    pub fn status_code(self) -> u16 {
        self.describe().0
    }

    pub fn name(self) -> &'static str {
        self.describe().1
    }

    pub fn class_name(self) -> &'static str {
        self.describe().2
    }
}

#[derive(Debug)]
pub struct HoardError {
    pub kind: ErrorKind,
    pub message: String,
    pub source: Option<AnyError>,
}

macro_rules! constructors {
    ($($fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            pub fn $fn_name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        )*
    };
}

impl HoardError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    constructors! {
        bad_request => BadRequest,
        not_found => NotFound,
        conflict => Conflict,
        payload_too_large => PayloadTooLarge,
        range_not_satisfiable => RangeNotSatisfiable,
        too_early => TooEarly,
        general_error => GeneralError,
        not_implemented => NotImplemented,
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn is_server_error(&self) -> bool {
        self.code() >= 500
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    /// Find a `HoardError` anywhere in an `anyhow` chain.
    pub fn find_in(err: &AnyError) -> Option<&HoardError> {
        err.chain().find_map(|e| e.downcast_ref::<HoardError>())
    }

    /// Same kind and message, without the internal source chain.
    pub fn sanitize_for_client(&self) -> HoardError {
        HoardError::new(self.kind, self.message.clone())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "success": false,
            "message": self.message,
            "name": self.kind.name(),
            "code": self.code(),
            "className": self.kind.class_name(),
        })
    }
}

impl fmt::Display for HoardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.code(), self.message)
    }
}

impl std::error::Error for HoardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}
