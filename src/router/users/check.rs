//! Tell whether a username exists on the directory.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(
        length(max = 256),
        custom(function = "crate::router::validate_username")
    )]
    username: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    exists: bool,
}

pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let exists = state.existence.exists(body.username.trim()).await?;
    Ok(Json(Response { exists }))
}
