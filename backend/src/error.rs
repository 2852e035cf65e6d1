use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::{ErrorResponse, ModelKind, StatusErrorResponse};

use crate::inference::runtime::InferenceError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{} model not loaded", .0.display_name())]
    ModelUnavailable(ModelKind),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Could not decode image: {0}")]
    Decode(String),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// The `{status: "error", message}` envelope used by the suggestion route.
    pub fn status_envelope(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(StatusErrorResponse::new(self.to_string()))
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable(_) | ApiError::Inference(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_taxonomy() {
        assert_eq!(
            ApiError::ModelUnavailable(ModelKind::Stress).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Validation(ValidationError::MissingField("age".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Decode("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Inference(InferenceError::Runtime("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn unavailable_message_names_model() {
        assert_eq!(
            ApiError::ModelUnavailable(ModelKind::FaceExpression).to_string(),
            "Face expression model not loaded"
        );
    }
}
