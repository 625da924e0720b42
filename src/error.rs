use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

use crate::abtest::AbTestError;
use crate::analytics::AnalyticsError;
use crate::auth::AuthError;
use crate::gdpr::GdprError;
use crate::jobs::JobError;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("database error: {0}")]
    DatabaseError(sqlx::Error),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InternalError(String),
}

/// Body of every failed response: `{success: false, error, message}`.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error":"SerializationError","message":"Failed to serialize error"}"#
                .to_string()
        })
    }
}

impl ApiError {
    pub fn status(&self) -> Status {
        match self {
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => Status::InternalServerError,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Unauthorized(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::DatabaseError(_) => "DatabaseError",
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::InternalError(_) => "InternalError",
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        match &self {
            ApiError::DatabaseError(e) => log::error!("database error: {}", e),
            ApiError::InternalError(msg) => log::error!("internal error: {}", msg),
            other => log::debug!("{}: {}", other.kind(), other),
        }

        // Database details stay in the log.
        let message = match &self {
            ApiError::DatabaseError(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        let json = ErrorBody::new(self.kind(), message).to_json();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<ErrorBody>();
        for status in [400, 401, 403, 404, 409, 500] {
            add_schema_response(&mut responses, status, "application/json", schema.clone())?;
        }
        Ok(responses)
    }
}

fn kind_for_status(status: Status) -> &'static str {
    match status.code {
        400 | 422 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "Conflict",
        413 => "PayloadTooLarge",
        code if code >= 500 => "InternalError",
        _ => "Error",
    }
}

/// Catch-all that keeps guard and routing failures in the JSON error shape.
#[catch(default)]
fn json_catcher(status: Status, _request: &Request<'_>) -> (Status, (ContentType, String)) {
    let message = status.reason().unwrap_or("Request failed");
    let body = ErrorBody::new(kind_for_status(status), message).to_json();
    (status, (ContentType::JSON, body))
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![json_catcher]
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(ref db_err) => match db_err.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    ApiError::Conflict("A record with the same unique value already exists".into())
                }
                Some(FOREIGN_KEY_VIOLATION) => {
                    ApiError::BadRequest("Referenced record does not exist".into())
                }
                _ => ApiError::DatabaseError(err),
            },
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Sqlx(e) => ApiError::from(e),
            JobError::Invalid(msg) => ApiError::BadRequest(msg),
            JobError::NotFound(id) => ApiError::NotFound(format!("Job {} not found", id)),
            JobError::FileMissing(msg) => ApiError::NotFound(msg),
            JobError::NotCancellable(status) => ApiError::Conflict(format!(
                "Job cannot be cancelled in status '{}'",
                status.as_str()
            )),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = err.status();
        match status.code {
            400 => ApiError::BadRequest(err.to_string()),
            401 => ApiError::Unauthorized(err.to_string()),
            403 | 423 => ApiError::Forbidden(err.to_string()),
            _ => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<AbTestError> for ApiError {
    fn from(err: AbTestError) -> Self {
        match err {
            AbTestError::Sqlx(e) => ApiError::from(e),
            AbTestError::Invalid(msg) => ApiError::BadRequest(msg),
            AbTestError::NotFound(msg) => ApiError::NotFound(msg),
            AbTestError::Conflict(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<GdprError> for ApiError {
    fn from(err: GdprError) -> Self {
        match err {
            GdprError::Sqlx(e) => ApiError::from(e),
            GdprError::Invalid(msg) => ApiError::BadRequest(msg),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::Sqlx(e) => ApiError::from(e),
            AnalyticsError::Invalid(msg) => ApiError::BadRequest(msg),
            AnalyticsError::NotFound(msg) => ApiError::NotFound(msg),
        }
    }
}
