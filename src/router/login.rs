//! Sign in with directory credentials.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::photo;
use crate::router::Valid;
use crate::token::EXPIRATION_TIME;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(
        length(max = 256, message = "Username is too long."),
        custom(
            function = "crate::router::validate_username",
            message = "Username contains invalid characters."
        )
    )]
    pub username: String,
    #[validate(length(max = 255, message = "Password is too long."))]
    pub password: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub token_type: String,
    pub token: String,
    pub expires_in: u64,
    pub username: String,
    pub name: String,
    pub onboarding_complete: bool,
    /// Directory thumbnail as a `data:` URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Handler to log in.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let identity = state
        .verifier
        .verify(body.username.trim(), &body.password)
        .await?;
    let profile = state.profiles.upsert_login(&identity).await?;
    let token = state.token.create(&identity, profile.onboarding_complete)?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE.to_owned(),
        token,
        expires_in: EXPIRATION_TIME,
        username: identity.username,
        name: identity.name,
        onboarding_complete: profile.onboarding_complete,
        image: identity.photo.as_deref().map(photo::data_uri),
    }))
}
