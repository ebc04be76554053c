//! Upload a new profile photo.

use axum::extract::{Multipart, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::photo::{self, PhotoError};
use crate::profile::AuditAction;
use crate::token::Claims;
use crate::{AppState, ServerError};

const FIELD: &str = "image";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    success: bool,
    /// `data:` URI of the new thumbnail.
    image: String,
}

pub async fn handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    mut multipart: Multipart,
) -> Result<Json<Response>> {
    let limits = state.photo_limits();

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FIELD) {
            upload = Some(field.bytes().await?);
            break;
        }
    }
    let upload = upload.ok_or(PhotoError::Missing)?;

    let encoder = state.encoder.clone();
    // Decoding and resizing are CPU bound.
    let prepared = tokio::task::spawn_blocking(move || {
        photo::prepare(&upload, encoder.as_ref(), &limits)
    })
    .await
    .map_err(|err| ServerError::Internal(err.to_string()))??;

    let image = prepared.data_uri();
    let sizes = serde_json::json!({
        "thumbnailBytes": prepared.thumbnail.len(),
        "originalBytes": prepared.original.len(),
    });
    state
        .writer
        .update_photo(&claims.username, prepared, &claims.caller())
        .await?;

    if let Err(err) = state
        .profiles
        .audit(&claims.username, AuditAction::PhotoUpdated, sizes)
        .await
    {
        tracing::error!(error = %err, username = %claims.username, "cannot audit photo update");
    }

    Ok(Json(Response {
        success: true,
        image,
    }))
}
