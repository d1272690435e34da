//! Native-error translation.
//!
//! Each backend registers one [`ErrorTranslator`]. Adapters call
//! [`TranslatorRegistry::translate`] exactly where a native call returns, so no
//! native error is ever inspected anywhere else.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::document::DocumentErrorTranslator;
use crate::backends::keyvalue::KeyValueErrorTranslator;
use crate::core::BackendKind;
use crate::error::{DataError, ErrorKind, NativeError};

/// Maps one backend's native errors onto the unified taxonomy.
pub trait ErrorTranslator: Send + Sync + std::fmt::Debug {
    /// The backend whose errors this translator understands.
    fn backend(&self) -> BackendKind;

    /// Classifies a native error. Must be pure and total.
    fn classify(&self, error: &NativeError) -> ErrorKind;
}

/// An explicit registry of translators, keyed by backend.
#[derive(Debug, Clone, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<BackendKind, Arc<dyn ErrorTranslator>>,
}

impl TranslatorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in translators for both backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KeyValueErrorTranslator));
        registry.register(Arc::new(DocumentErrorTranslator));
        registry
    }

    /// Registers a translator, replacing any previous one for the same backend.
    pub fn register(&mut self, translator: Arc<dyn ErrorTranslator>) {
        self.translators.insert(translator.backend(), translator);
    }

    /// Returns the translator for a backend.
    pub fn get(&self, backend: BackendKind) -> Option<&Arc<dyn ErrorTranslator>> {
        self.translators.get(&backend)
    }

    /// Translates a native error into a [`DataError`].
    ///
    /// Errors from a backend without a registered translator become
    /// [`ErrorKind::InternalServerError`].
    pub fn translate(&self, error: NativeError) -> DataError {
        let backend = error.backend;
        let kind = self
            .translators
            .get(&backend)
            .map(|t| t.classify(&error))
            .unwrap_or(ErrorKind::InternalServerError);
        DataError::new(kind, error.message.clone())
            .with_backend(backend)
            .with_source(error)
    }
}
