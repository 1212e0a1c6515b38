//! Embedding collaborator boundary.

use crate::{Error, Result};
use std::sync::{Arc, Mutex};

/// Trait for host-provided embedding generators.
///
/// The dimension is fixed per process; the graph store independently
/// verifies it against the dimension detected from the first stored vector.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if embedding fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if embedding fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Mutex-guarded shared embedder handle.
///
/// The underlying driver may not be reentrant, so the indexing pipeline and
/// the query path funnel their calls through one lock. Cloning shares the
/// guard.
#[derive(Clone)]
pub struct SharedEmbedder {
    inner: Arc<Mutex<Box<dyn Embedder>>>,
    dimensions: usize,
}

impl SharedEmbedder {
    /// Wraps an embedder for shared use.
    #[must_use]
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        let dimensions = embedder.dimensions();
        Self {
            inner: Arc::new(Mutex::new(embedder)),
            dimensions,
        }
    }

    /// Returns the embedding dimension.
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embeds one text under the guard.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if the driver fails or the
    /// guard is poisoned.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| Error::Collaborator("embedder mutex poisoned".to_string()))?;
        guard.embed(text)
    }

    /// Embeds several texts under one guard acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Collaborator`] if the driver fails.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| Error::Collaborator("embedder mutex poisoned".to_string()))?;
        guard.embed_batch(texts)
    }
}

impl std::fmt::Debug for SharedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEmbedder")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}
