//! RMBG background removal HTTP server
//!
//! Serves `POST /` (multipart `image` field in, transparent PNG out) and a `GET /` health
//! check, backed by the RMBG-1.4 segmentation model running in ONNX Runtime.

use rmbg_server::cli;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
