//! Get the profile of the signed in user.

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::Result;
use crate::profile::{ProfileError, ProfileRecord};
use crate::token::Claims;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(flatten)]
    profile: ProfileRecord,
    id: String,
    /// Token expiration, in seconds since epoch.
    expires_at: u64,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Response>> {
    let profile = state
        .profiles
        .find(&claims.username)
        .await?
        .ok_or(ProfileError::NotFound)?;

    Ok(Json(Response {
        profile,
        id: claims.sub,
        expires_at: claims.exp,
    }))
}
