#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # RMBG Background Removal Server
//!
//! An HTTP service that removes image backgrounds with the `briaai/RMBG-1.4` segmentation
//! model running in ONNX Runtime.
//!
//! ## Features
//!
//! - **Single endpoint**: `POST /` with a multipart `image` field returns a transparent PNG;
//!   `GET /` is a health check
//! - **Adaptive resize**: uploads are bounded to 1920 px per edge and 1920×1080 pixels of
//!   area before segmentation, keeping their aspect ratio
//! - **Hardware acceleration**: CUDA, `CoreML` and CPU execution providers, chosen once
//!   when the model loads
//! - **Model management**: first start downloads the model from `HuggingFace` into a
//!   local cache
//! - **One model per process**: loaded once (single-flight) and shared by every worker
//!
//! ## Embedding the HTTP routes
//!
//! Any [`Segmenter`] can back the routes, which is how the integration tests run without
//! a model file:
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer};
//! use image::{RgbImage, RgbaImage};
//! use rmbg_server::{server, ModelHandle, Segmenter, ServerConfig};
//! use std::sync::Arc;
//!
//! /// Keeps every pixel
//! struct Opaque;
//!
//! impl Segmenter for Opaque {
//!     fn segment(&self, image: &RgbImage) -> rmbg_server::Result<RgbaImage> {
//!         Ok(RgbaImage::from_fn(image.width(), image.height(), |x, y| {
//!             let [r, g, b] = image.get_pixel(x, y).0;
//!             image::Rgba([r, g, b, 255])
//!         }))
//!     }
//! }
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder().port(8080).build()?;
//! // With the `onnx` feature, `ModelHandle::for_server_config(config.clone())` loads RMBG-1.4
//! let model = ModelHandle::ready(Arc::new(Opaque));
//! let state = web::Data::new(server::AppState::new(model, config.max_upload_bytes));
//!
//! HttpServer::new(move || {
//!     App::new()
//!         .app_data(state.clone())
//!         .configure(server::configure)
//! })
//! .bind(config.bind_address())?
//! .run()
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod cache;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod resize;
pub mod segmenter;
pub mod server;
pub mod services;
pub mod tracing_config;
pub mod utils;

pub use backends::*;
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{ExecutionProvider, ServeMode, ServerConfig, ServerConfigBuilder};
pub use download::ModelDownloader;
pub use error::{Result, RmbgError};
pub use inference::{InferenceBackend, InferenceConfig};
pub use models::{ModelManager, ModelSource, ModelSpec, PreprocessingConfig};
pub use processor::BackgroundRemovalProcessor;
pub use resize::{smart_resize, ResizeConstraints};
pub use segmenter::{ModelHandle, Segmenter};
pub use services::ImageCodec;
pub use tracing_config::{TracingConfig, TracingFormat};
