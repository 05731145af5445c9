//! HTTP surface of the service
//!
//! Two routes on `/`: `GET` is a health check and `POST` runs background removal on a
//! multipart upload. The model handle is shared by every worker through [`AppState`].

pub mod error;
pub mod handlers;

use crate::config::ServerConfig;
use crate::resize::ResizeConstraints;
use crate::segmenter::ModelHandle;
use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpServer};
use tracing::info;

pub use error::ApiError;

/// State shared by all request handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Segmentation model, loaded once per process
    pub model: ModelHandle,
    /// Bounds applied to uploads before segmentation
    pub constraints: ResizeConstraints,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: usize,
}

impl AppState {
    #[must_use]
    pub fn new(model: ModelHandle, max_upload_bytes: usize) -> Self {
        Self {
            model,
            constraints: ResizeConstraints::DEFAULT,
            max_upload_bytes,
        }
    }
}

/// Register the service routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(handlers::health))
            .route(web::post().to(handlers::remove_background)),
    );
}

/// CORS policy allowing browser calls from `origins` only
#[must_use]
pub fn cors(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .expose_headers([header::CONTENT_TYPE])
        .max_age(3600)
}

/// Bind and serve until the server is stopped
///
/// # Errors
/// - The address cannot be bound
/// - The server fails while running
pub async fn run(config: &ServerConfig, model: ModelHandle) -> std::io::Result<()> {
    let state = web::Data::new(AppState::new(model, config.max_upload_bytes));
    let origins = config.allowed_origins.clone();
    let workers = config.effective_workers();
    let address = config.bind_address();

    info!(
        address = %address,
        workers,
        mode = ?config.mode,
        origins = ?origins,
        "Starting HTTP server"
    );

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(cors(&origins))
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .workers(workers)
    .bind(address)?
    .run()
    .await
}
