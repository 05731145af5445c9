//! Segmentation trait and the process-wide model handle

use crate::error::{Result, RmbgError};
use image::{RgbImage, RgbaImage};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Something that can remove the background from an image
///
/// Implementations must be callable from several request workers at once.
pub trait Segmenter: Send + Sync {
    /// Return `image` with alpha set to the predicted foreground mask
    ///
    /// # Errors
    /// - Inference or postprocessing failures
    fn segment(&self, image: &RgbImage) -> Result<RgbaImage>;
}

type Loader = Arc<dyn Fn() -> Result<Arc<dyn Segmenter>> + Send + Sync>;

/// Lazily loaded, shared segmenter
///
/// Clones share the same cell, so the loader runs at most once per process no matter how
/// many clones call [`ModelHandle::get`] concurrently. A failed load leaves the handle
/// empty and the next call tries again.
#[derive(Clone)]
pub struct ModelHandle {
    cell: Arc<OnceCell<Arc<dyn Segmenter>>>,
    loader: Loader,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    /// Create a handle that runs `loader` on first use
    ///
    /// The loader runs on the blocking thread pool.
    pub fn new<F>(loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Segmenter>> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader: Arc::new(loader),
        }
    }

    /// Create a handle around an already constructed segmenter
    pub fn ready(segmenter: Arc<dyn Segmenter>) -> Self {
        Self {
            cell: Arc::new(OnceCell::new_with(Some(segmenter))),
            loader: Arc::new(|| Err(RmbgError::internal("Model handle has no loader"))),
        }
    }

    /// Handle loading the ONNX model described by `config`
    #[cfg(feature = "onnx")]
    #[must_use]
    pub fn for_server_config(config: crate::config::ServerConfig) -> Self {
        Self::new(move || {
            let processor = crate::processor::BackgroundRemovalProcessor::from_server_config(&config)?;
            Ok(Arc::new(processor) as Arc<dyn Segmenter>)
        })
    }

    /// Get the segmenter, loading it if this is the first call
    ///
    /// # Errors
    /// - Any error returned by the loader
    /// - The loading task panicked
    pub async fn get(&self) -> Result<Arc<dyn Segmenter>> {
        let segmenter = self
            .cell
            .get_or_try_init(|| async {
                let loader = Arc::clone(&self.loader);
                tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| RmbgError::internal(format!("Model loading task failed: {e}")))?
            })
            .await?;
        Ok(Arc::clone(segmenter))
    }

    /// Whether the segmenter has been loaded
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}
