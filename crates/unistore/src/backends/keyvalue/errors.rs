//! Key-value error translation.

use crate::core::BackendKind;
use crate::error::{ErrorKind, NativeError};
use crate::translator::ErrorTranslator;

/// Translates key-value service error codes.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueErrorTranslator;

impl ErrorTranslator for KeyValueErrorTranslator {
    fn backend(&self) -> BackendKind {
        BackendKind::KeyValue
    }

    fn classify(&self, error: &NativeError) -> ErrorKind {
        let Some(code) = error.code.as_deref() else {
            return ErrorKind::InternalServerError;
        };
        match code {
            "ConditionalCheckFailedException" => ErrorKind::ConditionalCheckFailed,
            "TransactionCanceledException" => {
                if error.has_label("ConditionalCheckFailed")
                    || error.message.contains("ConditionalCheckFailed")
                {
                    ErrorKind::ConditionalCheckFailed
                } else {
                    ErrorKind::Transaction
                }
            }
            "TransactionConflictException"
            | "TransactionInProgressException"
            | "IdempotentParameterMismatchException" => ErrorKind::Transaction,
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "LimitExceededException" => ErrorKind::ThroughputExceeded,
            "ResourceNotFoundException" => ErrorKind::ResourceNotFound,
            "AccessDeniedException"
            | "UnrecognizedClientException"
            | "MissingAuthenticationTokenException"
            | "InvalidSignatureException"
            | "ExpiredTokenException" => ErrorKind::AccessDenied,
            "ValidationException"
            | "SerializationException"
            | "ItemCollectionSizeLimitExceededException" => ErrorKind::Validation,
            "RequestTimeout" | "TimeoutError" => ErrorKind::Timeout,
            "DispatchFailure" | "ConnectionError" | "NetworkingError" => ErrorKind::Connection,
            "InternalServerError" | "ServiceUnavailable" => ErrorKind::InternalServerError,
            _ => ErrorKind::InternalServerError,
        }
    }
}
