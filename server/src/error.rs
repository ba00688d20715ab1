use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde::Serialize;

use crate::runtime::directory::DirectoryError;

#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    #[error("Directory unavailable: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Internal server error")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

impl ResponseError for RelayServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            RelayServerError::Directory(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_response = ErrorResponse {
            success: false,
            error: self.to_string(),
        };

        HttpResponse::build(status).json(error_response)
    }
}

pub type Result<T> = std::result::Result<T, RelayServerError>;
