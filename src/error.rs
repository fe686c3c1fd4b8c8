use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (or owned by someone else).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or unsupported file format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Missing, invalid or expired credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Operation not allowed on this resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Uniqueness violation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client exceeded the request budget.
    #[error("Too many requests, retry in {retry_after} seconds")]
    TooManyRequests {
        /// Seconds until the current window resets.
        retry_after: u64,
    },

    /// Upload larger than the configured limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(String),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Image processing error.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Zip(_) | AppError::Pdf(_) | AppError::Xml(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(error = %self, "Request error");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();

        if let AppError::TooManyRequests { retry_after } = self
            && let Ok(value) = retry_after.to_string().parse()
        {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, value);
        }

        response
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
