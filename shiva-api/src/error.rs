use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use shiva_core::ShivaError;

pub type ApiResult<T> = Result<T, ApiError>;

/// Boundary wrapper that renders a [`ShivaError`] as
/// `{"status":"error","code":...,"message":...}`.
#[derive(Debug)]
pub struct ApiError(pub ShivaError);

impl From<ShivaError> for ApiError {
    fn from(e: ShivaError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ShivaError::Validation(_) => StatusCode::BAD_REQUEST,
            ShivaError::Unauthorized => StatusCode::UNAUTHORIZED,
            ShivaError::Forbidden(_) => StatusCode::FORBIDDEN,
            ShivaError::NotFound(_) => StatusCode::NOT_FOUND,
            ShivaError::Conflict(_) => StatusCode::CONFLICT,
            ShivaError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ShivaError::TransientProvider(_) => StatusCode::BAD_GATEWAY,
            ShivaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            ShivaError::Internal(e) => tracing::error!("Request failed: {:#}", e),
            ShivaError::TransientProvider(e) => tracing::warn!("Delivery provider error: {}", e),
            _ => {}
        }

        let status = self.status_code();
        let body = serde_json::json!({
            "status": "error",
            "code": self.0.code(),
            "message": self.0.public_message(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_http_status() {
        let cases = [
            (ShivaError::validation("bad"), StatusCode::BAD_REQUEST),
            (ShivaError::Unauthorized, StatusCode::UNAUTHORIZED),
            (ShivaError::Forbidden("no"), StatusCode::FORBIDDEN),
            (ShivaError::NotFound("Support page"), StatusCode::NOT_FOUND),
            (ShivaError::conflict("taken"), StatusCode::CONFLICT),
            (ShivaError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (ShivaError::Internal(anyhow::anyhow!("boom")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).into_response().status(), status);
        }
    }
}
