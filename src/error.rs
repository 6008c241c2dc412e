use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::db_operations::DbError;

/// Error taxonomy surfaced at the HTTP boundary. Every variant renders as a
/// JSON body with a human-readable `message` field and the matching status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests, please try again later")]
    RateLimited,
    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn internal<E: std::fmt::Display>(context: &str, err: E) -> Self {
        log::error!("{}: {}", context, err);
        ApiError::Internal(context.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal detail is logged where the error is constructed and never
        // leaked to the client.
        HttpResponse::build(self.status_code()).json(json!({ "message": self.to_string() }))
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            DbError::Validation(msg) => ApiError::Validation(msg),
            DbError::Forbidden => ApiError::Forbidden("Permission denied".to_string()),
            DbError::NotVerified => {
                ApiError::Authentication("Please verify your email before logging in".to_string())
            }
            DbError::Locked { seconds_remaining } => ApiError::Authentication(format!(
                "Account is locked, try again in {} seconds",
                seconds_remaining
            )),
            DbError::BadCredentials { attempts_remaining } => ApiError::Authentication(format!(
                "Invalid credentials, {} attempts remaining",
                attempts_remaining
            )),
            other => ApiError::internal("Database operation failed", other),
        }
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        ApiError::internal("Failed to get a database connection", err)
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::internal("Blocking task failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_renders_429_with_message() {
        let err = ApiError::RateLimited;
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        let res = err.error_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.to_string(), "Too many requests, please try again later");
    }
}
