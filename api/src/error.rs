use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::{ErrorBody, StoreError, SubmitError};
use tracing::error;

/// Errores de los handlers. Todos se responden como `{"message": ...}`;
/// los internos se loguean y salen con un mensaje genérico.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("cannot decode body")]
    UndecodableBody,

    #[error("cannot decode image")]
    UndecodableImage,

    #[error("taskId={0} is not exists")]
    TaskNotFound(String),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::UndecodableBody | ApiError::UndecodableImage => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::TaskNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Store(StoreError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, format!("{} not found", what))
            }
            ApiError::Submit(_) | ApiError::Store(_) | ApiError::Internal(_) => {
                error!(error = %self, "error interno");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}
