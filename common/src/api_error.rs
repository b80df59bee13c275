use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use database::provider::DbError;
use thiserror::Error;

/// The full failure taxonomy of the HTTP surface. Every handler returns
/// `Result<HttpResponse, ApiError>`; the `ResponseError` impl does the
/// status mapping in one place.
///
/// Note the 400/404 split: a malformed or unresolvable id in the route
/// path is `NotFound`, while a body-supplied reference that does not
/// resolve is `ReferenceNotFound` — invalid input, not a missing page.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("Referenced {0} does not exist")]
    ReferenceNotFound(&'static str),

    #[error("Resource not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("Internal server error")]
    Database(#[source] DbError),

    #[error("Upstream service error")]
    Upstream(String),
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::AlreadyExists => ApiError::Conflict("Record already exists".to_string()),
            other => ApiError::Database(other),
        }
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(e: mongodb::error::Error) -> Self {
        ApiError::Database(DbError::DatabaseError(e))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Validation(_) | ApiError::ReferenceNotFound(_) | ApiError::Conflict(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Display of Database/Upstream is a fixed string; failure detail
        // stays in the error value and never reaches the response body.
        HttpResponse::build(self.status_code()).json(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Unauthenticated.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::ReferenceNotFound("profile").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Conflict("dup".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Upstream("vendor down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn duplicate_record_maps_to_conflict() {
        let err: ApiError = DbError::AlreadyExists.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let err = ApiError::Database(DbError::ExtractionFailed("secret dsn".into()));
        assert_eq!(err.to_string(), "Internal server error");
        let err = ApiError::Upstream("vendor stack trace".into());
        assert_eq!(err.to_string(), "Upstream service error");
    }
}
