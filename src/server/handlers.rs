//! Request handlers

use super::{error::ApiError, AppState};
use crate::error::RmbgError;
use crate::resize::smart_resize;
use crate::services::ImageCodec;
use actix_multipart::Multipart;
use actix_web::{http::header::ContentType, web, HttpResponse};
use futures_util::TryStreamExt;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// `GET /`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::plaintext())
        .body("OK")
}

/// `POST /`: remove the background from the `image` field and answer with a PNG
pub async fn remove_background(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!("remove_background", %request_id);

    async move {
        let result = process_upload(&state, payload).await;
        match &result {
            Ok(response) => info!(status = %response.status(), "Image processed"),
            Err(ApiError::MissingImage) => info!("Request without image field"),
            Err(ApiError::Processing(e)) => error!(error = %e, "Error processing image"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn process_upload(state: &AppState, mut payload: Multipart) -> Result<HttpResponse, ApiError> {
    let upload = read_image_field(&mut payload, state.max_upload_bytes).await?;
    debug!(bytes = upload.len(), "Upload received");

    let segmenter = state.model.get().await?;
    let constraints = state.constraints;
    let span = tracing::Span::current();

    let png = web::block(move || {
        let _entered = span.enter();
        let image = ImageCodec::decode_rgb(&upload)?;
        let image = smart_resize(image, &constraints)?;
        let result = segmenter.segment(&image)?;
        ImageCodec::encode_png(&result)
    })
    .await
    .map_err(|e| RmbgError::internal(format!("Blocking task failed: {e}")))??;

    Ok(HttpResponse::Ok().content_type("image/png").body(png))
}

/// Find the `image` field and read it into memory
///
/// Anything that goes wrong before the field is found means the client did not send an
/// image; once the field is found, read failures are processing errors.
async fn read_image_field(payload: &mut Multipart, limit: usize) -> Result<Vec<u8>, ApiError> {
    loop {
        let mut field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(ApiError::MissingImage),
            Err(e) => {
                debug!(error = %e, "Unreadable multipart body");
                return Err(ApiError::MissingImage);
            },
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| RmbgError::processing(format!("Failed to read upload: {e}")))?
        {
            if bytes.len() + chunk.len() > limit {
                return Err(RmbgError::processing(format!(
                    "Upload exceeds the {limit} byte limit"
                ))
                .into());
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(bytes);
    }
}
