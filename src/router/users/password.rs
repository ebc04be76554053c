//! Change the directory password of the signed in user.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::AppState;
use crate::error::Result;
use crate::profile::AuditAction;
use crate::router::Valid;
use crate::token::Claims;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(
    function = "new_differs",
    skip_on_field_errors = false,
    message = "New password must differ from the current one."
))]
pub struct Body {
    #[validate(length(min = 1, max = 255))]
    old_password: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must be between 8 and 255 characters."
    ))]
    new_password: String,
    #[validate(must_match(
        other = "new_password",
        message = "Passwords do not match."
    ))]
    confirm_password: String,
}

fn new_differs(body: &Body) -> std::result::Result<(), ValidationError> {
    if body.new_password == body.old_password {
        return Err(ValidationError::new("password_reuse"));
    }
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    success: bool,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    state
        .writer
        .change_password(
            &claims.username,
            &body.old_password,
            &body.new_password,
            &claims.caller(),
        )
        .await?;

    // The directory already holds the new password; a lost audit row must
    // not turn this into a failure.
    if let Err(err) = state
        .profiles
        .audit(
            &claims.username,
            AuditAction::PasswordChanged,
            serde_json::json!({ "dn": claims.dn }),
        )
        .await
    {
        tracing::error!(error = %err, username = %claims.username, "cannot audit password change");
    }

    Ok(Json(Response { success: true }))
}
