//! Profile data kept next to the directory.
//!
//! The directory stays the source of truth for identity. PostgreSQL only
//! holds what the directory has no attribute for: onboarding state, the
//! recovery email and an audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;

use crate::ldap::NormalizedIdentity;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error("SQL request failed: {0}")]
    Sql(#[from] sqlx::Error),
}

/// Stored profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub username: String,
    pub email: Option<String>,
    pub name: String,
    pub dn: String,
    pub groups: Vec<String>,
    pub recovery_email: Option<String>,
    pub onboarding_complete: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Audited user actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    RecoveryEmailSet,
    RecoveryEmailUpdated,
    PasswordChanged,
    PhotoUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecoveryEmailSet => "recovery_email_set",
            Self::RecoveryEmailUpdated => "recovery_email_updated",
            Self::PasswordChanged => "password_changed",
            Self::PhotoUpdated => "photo_updated",
        }
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Refresh the profile from a fresh login.
    async fn upsert_login(
        &self,
        identity: &NormalizedIdentity,
    ) -> Result<ProfileRecord, ProfileError>;

    async fn find(&self, username: &str)
    -> Result<Option<ProfileRecord>, ProfileError>;

    /// Store the recovery email and audit the previous value.
    ///
    /// `complete_onboarding` marks the first set, audited as
    /// `recovery_email_set`. Later changes are `recovery_email_updated`.
    async fn set_recovery_email(
        &self,
        username: &str,
        email: &str,
        complete_onboarding: bool,
    ) -> Result<ProfileRecord, ProfileError>;

    async fn audit(
        &self,
        username: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<(), ProfileError>;
}

/// Profiles are keyed by lowercase username.
fn key(username: &str) -> String {
    username.to_lowercase()
}

fn recovery_details(
    action: AuditAction,
    email: &str,
    previous: Option<&str>,
    completed_onboarding: bool,
) -> serde_json::Value {
    match action {
        AuditAction::RecoveryEmailSet => serde_json::json!({
            "recoveryEmail": email,
            "previousRecoveryEmail": previous,
            "completedOnboarding": completed_onboarding,
        }),
        _ => serde_json::json!({
            "newRecoveryEmail": email,
            "previousRecoveryEmail": previous,
        }),
    }
}

/// [`ProfileStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PostgresProfileStore {
    pool: PgPool,
}

impl PostgresProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PostgresProfileStore {
    async fn upsert_login(
        &self,
        identity: &NormalizedIdentity,
    ) -> Result<ProfileRecord, ProfileError> {
        let record = sqlx::query_as::<_, ProfileRecord>(
            r#"INSERT INTO profiles (username, email, name, dn, groups, last_login_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (username) DO UPDATE SET
                email = EXCLUDED.email,
                name = EXCLUDED.name,
                dn = EXCLUDED.dn,
                groups = EXCLUDED.groups,
                last_login_at = NOW(),
                updated_at = NOW()
            RETURNING *"#,
        )
        .bind(key(&identity.username))
        .bind(&identity.email)
        .bind(&identity.name)
        .bind(&identity.dn)
        .bind(&identity.groups)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find(
        &self,
        username: &str,
    ) -> Result<Option<ProfileRecord>, ProfileError> {
        Ok(sqlx::query_as::<_, ProfileRecord>(
            r#"SELECT * FROM profiles WHERE username = $1"#,
        )
        .bind(key(username))
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn set_recovery_email(
        &self,
        username: &str,
        email: &str,
        complete_onboarding: bool,
    ) -> Result<ProfileRecord, ProfileError> {
        let mut tx = self.pool.begin().await?;

        let previous = sqlx::query_as::<_, ProfileRecord>(
            r#"SELECT * FROM profiles WHERE username = $1 FOR UPDATE"#,
        )
        .bind(key(username))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ProfileError::NotFound)?;

        let record = sqlx::query_as::<_, ProfileRecord>(
            r#"UPDATE profiles SET
                recovery_email = $2,
                onboarding_complete = onboarding_complete OR $3,
                updated_at = NOW()
            WHERE username = $1
            RETURNING *"#,
        )
        .bind(key(username))
        .bind(email)
        .bind(complete_onboarding)
        .fetch_one(&mut *tx)
        .await?;

        let action = if complete_onboarding {
            AuditAction::RecoveryEmailSet
        } else {
            AuditAction::RecoveryEmailUpdated
        };
        sqlx::query(
            r#"INSERT INTO audit_logs (username, action, details) VALUES ($1, $2, $3)"#,
        )
        .bind(key(username))
        .bind(action.as_str())
        .bind(recovery_details(
            action,
            email,
            previous.recovery_email.as_deref(),
            !previous.onboarding_complete && complete_onboarding,
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn audit(
        &self,
        username: &str,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<(), ProfileError> {
        sqlx::query(
            r#"INSERT INTO audit_logs (username, action, details) VALUES ($1, $2, $3)"#,
        )
        .bind(key(username))
        .bind(action.as_str())
        .bind(details)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
