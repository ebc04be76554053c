//! Error handler for the portal.
//!
//! Directory errors never reach the client verbatim: every variant maps to a
//! fixed message. Details are logged instead.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::ldap::{AuthError, CheckError, WriteError};
use crate::photo::PhotoError;
use crate::profile::ProfileError;
use crate::token::TokenError;

pub type Result<T> = std::result::Result<T, ServerError>;

pub const INVALID_CREDENTIALS: &str = "Invalid username or password.";
pub const OLD_PASSWORD_INVALID: &str = "Current password is incorrect.";
const DIRECTORY_UNAVAILABLE: &str =
    "Directory service is unavailable. Please try again later.";

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("error parsing form data: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error(transparent)]
    Photo(#[from] PhotoError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("internal server error, {0}")]
    Internal(String),

    #[error("invalid 'Authorization' header")]
    Unauthorized,
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue.to_string(),
            })
        })
        .collect()
}

fn unavailable() -> ResponseError {
    ResponseError::default()
        .title("Service unavailable.")
        .details(DIRECTORY_UNAVAILABLE)
        .status(StatusCode::SERVICE_UNAVAILABLE)
}

fn internal(err: &dyn std::error::Error) -> ResponseError {
    tracing::error!(error = %err, "server returned 500 status");
    ResponseError::default()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let bad_request = ResponseError::default()
            .title("There were validation errors with your request.")
            .status(StatusCode::BAD_REQUEST);
        let forbidden =
            ResponseError::default().title("Forbidden.").status(StatusCode::FORBIDDEN);

        let response = match &self {
            ServerError::Validation(validation_errors) => bad_request
                .details(&self.to_string())
                .errors(validation_errors),

            ServerError::Axum(rejection) => bad_request
                .details(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Multipart(err) => bad_request
                .title("Server error during data parsing.")
                .details(&err.body_text())
                .status(err.status()),

            ServerError::Auth(
                AuthError::InvalidCredentials | AuthError::UserNotFound,
            ) => ResponseError::default()
                .title("Authentication failed.")
                .details(INVALID_CREDENTIALS)
                .status(StatusCode::UNAUTHORIZED),
            ServerError::Auth(AuthError::AccountDisabled) => forbidden.details(
                "Your account is disabled. Please contact your administrator.",
            ),
            ServerError::Auth(AuthError::AccountLocked) => forbidden.details(
                "Your account is locked. Please try again later or contact your administrator.",
            ),
            ServerError::Auth(AuthError::DirectoryUnavailable)
            | ServerError::Write(WriteError::DirectoryUnavailable)
            | ServerError::Check(CheckError::DirectoryUnavailable) => {
                unavailable()
            },

            ServerError::Write(WriteError::OldSecretInvalid) => {
                bad_request.details(OLD_PASSWORD_INVALID)
            },
            ServerError::Write(WriteError::ConstraintViolation(text)) => {
                tracing::warn!(%text, "directory rejected the change");
                bad_request.details(
                    "The directory rejected the new value. Make sure the password meets the password policy.",
                )
            },
            ServerError::Write(WriteError::Unauthorized) => {
                forbidden.details("You are not allowed to modify this user.")
            },

            ServerError::Photo(PhotoError::Missing) => {
                bad_request.details("Missing 'image' field.")
            },
            ServerError::Photo(PhotoError::UnsupportedFormat) => bad_request
                .details("Invalid file type. Only JPEG and PNG are allowed."),
            ServerError::Photo(PhotoError::UploadTooLarge { .. }) => bad_request
                .details(&self.to_string())
                .status(StatusCode::PAYLOAD_TOO_LARGE),
            ServerError::Photo(PhotoError::TooLarge { .. }) => bad_request
                .details("Image cannot be reduced under the directory size limit."),
            ServerError::Photo(PhotoError::Image(_)) => {
                bad_request.details("Image cannot be decoded.")
            },

            ServerError::Profile(ProfileError::NotFound) => ResponseError::default()
                .title("Not found.")
                .details("Profile not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Unauthorized => ResponseError::default()
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Auth(_)
            | ServerError::Write(_)
            | ServerError::Profile(_)
            | ServerError::Token(_)
            | ServerError::Internal(_) => internal(&self),
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
