use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::models::InvalidInput;
use crate::repo::RepoError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")] InvalidInput(String),
    #[error("{0} not found")] NotFound(&'static str),
    #[error("{0} already exists")] Conflict(&'static str),
    #[error("too many requests")] TooManyRequests,
    /// Storage failure; the message is passed through to the client as-is.
    #[error("{0}")] Persistence(String),
}

impl ApiError {
    /// Map a repository error, naming the entity for the not-found and conflict cases.
    pub fn from_repo(entity: &'static str) -> impl Fn(RepoError) -> ApiError {
        move |e| match e {
            RepoError::NotFound => ApiError::NotFound(entity),
            RepoError::Conflict => ApiError::Conflict(entity),
            RepoError::Invalid(msg) => ApiError::InvalidInput(msg),
            RepoError::Persistence(msg) => {
                error!(entity, "persistence failure: {msg}");
                ApiError::Persistence(msg)
            }
        }
    }
}

impl From<InvalidInput> for ApiError {
    fn from(e: InvalidInput) -> Self {
        ApiError::InvalidInput(e.0)
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        ApiError::from_repo("Resource")(e)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiErrorBody { error: self.to_string() })
    }
}
