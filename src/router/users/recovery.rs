//! Recovery email, the single onboarding step.

use std::borrow::Cow;

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::Result;
use crate::profile::{ProfileError, ProfileRecord};
use crate::router::Valid;
use crate::token::Claims;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    #[validate(
        email(message = "Invalid email address."),
        length(max = 320)
    )]
    recovery_email: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Onboarding {
    recovery_email: Option<String>,
    onboarding_complete: bool,
    /// New bearer token, issued when onboarding just completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

impl From<ProfileRecord> for Onboarding {
    fn from(profile: ProfileRecord) -> Self {
        Self {
            recovery_email: profile.recovery_email,
            onboarding_complete: profile.onboarding_complete,
            token: None,
        }
    }
}

async fn profile(state: &AppState, claims: &Claims) -> Result<ProfileRecord> {
    Ok(state
        .profiles
        .find(&claims.username)
        .await?
        .ok_or(ProfileError::NotFound)?)
}

/// A recovery address must not be the primary one.
fn check_distinct(profile: &ProfileRecord, email: &str) -> Result<()> {
    if profile
        .email
        .as_deref()
        .is_some_and(|primary| primary.trim().eq_ignore_ascii_case(email))
    {
        let mut errors = ValidationErrors::new();
        errors.add(
            "recovery_email",
            ValidationError::new("primary_email").with_message(Cow::Borrowed(
                "Recovery email must differ from your primary email.",
            )),
        );
        return Err(ServerError::Validation(errors));
    }
    Ok(())
}

/// Onboarding state of the signed in user.
pub async fn get(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Onboarding>> {
    Ok(Json(profile(&state, &claims).await?.into()))
}

/// Set the recovery email and complete onboarding.
pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<Body>,
) -> Result<Json<Onboarding>> {
    let email = body.recovery_email.trim();
    check_distinct(&profile(&state, &claims).await?, email)?;

    let record = state
        .profiles
        .set_recovery_email(&claims.username, email, true)
        .await?;
    tracing::info!(username = %claims.username, "onboarding completed");

    let token = if claims.onboarding_complete {
        None
    } else {
        Some(state.token.refresh(&claims, record.onboarding_complete)?)
    };

    Ok(Json(Onboarding {
        token,
        ..Onboarding::from(record)
    }))
}

/// Replace the recovery email.
pub async fn update(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Valid(body): Valid<Body>,
) -> Result<Json<Onboarding>> {
    let email = body.recovery_email.trim();
    check_distinct(&profile(&state, &claims).await?, email)?;

    let record = state
        .profiles
        .set_recovery_email(&claims.username, email, false)
        .await?;
    Ok(Json(record.into()))
}
