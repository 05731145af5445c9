//! HTTP error mapping

use crate::error::RmbgError;
use actix_web::{http::header::ContentType, http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Body returned when the request has no `image` field
pub const MISSING_IMAGE_BODY: &str = "No image file";

/// Body returned for any failure after the upload was found
pub const PROCESSING_ERROR_BODY: &str = "Error processing image";

/// Errors surfaced to HTTP clients
///
/// Clients only ever see the fixed bodies above; the wrapped error is for logs.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The multipart body has no `image` field, or is not multipart at all
    #[error("request has no image field")]
    MissingImage,

    /// Reading, decoding, resizing, segmenting or encoding the upload failed
    #[error("image processing failed: {0}")]
    Processing(#[from] RmbgError),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingImage => StatusCode::BAD_REQUEST,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            Self::MissingImage => MISSING_IMAGE_BODY,
            Self::Processing(_) => PROCESSING_ERROR_BODY,
        };
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[actix_web::test]
    async fn test_missing_image_response() {
        let response = ApiError::MissingImage.error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, MISSING_IMAGE_BODY);
    }

    #[actix_web::test]
    async fn test_processing_error_hides_details() {
        let err = ApiError::from(RmbgError::inference("CUDA out of memory"));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = to_bytes(response.into_body()).await.unwrap();
        assert_eq!(body, PROCESSING_ERROR_BODY);
        assert!(err.to_string().contains("CUDA out of memory"));
    }
}
