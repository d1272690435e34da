//! Document error translation.

use crate::core::BackendKind;
use crate::error::{ErrorKind, NativeError};
use crate::translator::ErrorTranslator;

/// Translates document server error codes.
///
/// Numeric codes take precedence; symbolic names and labels are consulted
/// when the code is absent or unknown.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentErrorTranslator;

fn by_numeric_code(code: i32) -> Option<ErrorKind> {
    Some(match code {
        11000 | 11001 | 12582 => ErrorKind::DuplicateKey,
        13 | 18 | 8000 => ErrorKind::AccessDenied,
        26 => ErrorKind::ResourceNotFound,
        50 | 89 | 202 | 262 => ErrorKind::Timeout,
        6 | 7 | 91 | 189 | 9001 | 10107 | 11600 | 11602 | 13435 | 13436 => ErrorKind::Connection,
        112 | 225 | 244 | 251 | 256 | 257 | 263 => ErrorKind::Transaction,
        2 | 9 | 14 | 121 => ErrorKind::Validation,
        16500 => ErrorKind::ThroughputExceeded,
        _ => return None,
    })
}

impl ErrorTranslator for DocumentErrorTranslator {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn classify(&self, error: &NativeError) -> ErrorKind {
        if let Some(kind) = error.numeric_code.and_then(by_numeric_code) {
            return kind;
        }
        if error.has_label("NetworkError") {
            return ErrorKind::Connection;
        }
        match error.code.as_deref() {
            Some("ServerSelection" | "Io" | "ConnectionPoolCleared") => ErrorKind::Connection,
            Some("Authentication") => ErrorKind::AccessDenied,
            Some("InvalidArgument") => ErrorKind::Validation,
            _ => ErrorKind::InternalServerError,
        }
    }
}
