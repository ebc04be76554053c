use crate::ldap::Ldap;
use crate::ldap::entry::DirectoryEntry;
use crate::ldap::error::{AuthError, BindError};
use crate::ldap::projection::{
    DISTINGUISHED_NAME, NormalizedIdentity, USER_PRINCIPAL_NAME,
    identity_attributes, project,
};
use crate::ldap::session::{SearchRequest, Session};
use crate::telemetry;

/// Verifies end-user credentials against the directory.
#[derive(Clone)]
pub struct CredentialVerifier {
    ldap: Ldap,
}

impl CredentialVerifier {
    pub fn new(ldap: Ldap) -> Self {
        Self { ldap }
    }

    /// Bind as `username` and load its identity.
    ///
    /// Disabled accounts are reported before locked ones. Every session
    /// opened here is closed before returning.
    #[tracing::instrument(skip(self, password))]
    pub async fn verify(
        &self,
        username: &str,
        password: &str,
    ) -> Result<NormalizedIdentity, AuthError> {
        let result = self.run(username, password).await;
        telemetry::directory_operation("verify", result.is_ok());

        match &result {
            Ok(_) => tracing::info!("user authenticated"),
            Err(err @ (AuthError::DirectoryUnavailable | AuthError::Other(_))) => {
                tracing::error!(error = %err, "authentication failed")
            },
            Err(err) => tracing::info!(reason = %err, "authentication refused"),
        }
        result
    }

    async fn run(
        &self,
        username: &str,
        password: &str,
    ) -> Result<NormalizedIdentity, AuthError> {
        // Empty passwords would be an anonymous bind on most servers.
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let target = self.bind_target(username).await?;

        let mut session = self.ldap.open().await?;
        let result = self.authenticate(&mut session, &target, password).await;
        session.close().await;
        result
    }

    async fn authenticate(
        &self,
        session: &mut Session,
        target: &BindTarget,
        password: &str,
    ) -> Result<NormalizedIdentity, AuthError> {
        let config = self.ldap.config();
        session.bind(target.name(), password).await?;

        let request = match target {
            BindTarget::Dn(dn) => SearchRequest::base_object(dn),
            BindTarget::Principal(principal) => SearchRequest::subtree(
                &config.base_dn,
                self.ldap.principal_filter(principal),
            )
            .limit(1),
        }
        .attributes(identity_attributes(&config.username_attribute));

        let entry = session
            .search(&request)
            .await?
            .into_iter()
            .next()
            .ok_or(AuthError::UserNotFound)?;
        if !target.matches(&entry) {
            return Err(AuthError::Other(format!(
                "entry {} does not belong to bound identity {}",
                entry.dn,
                target.name()
            )));
        }

        let identity = project(&entry, &config.username_attribute)?;
        if identity.disabled {
            return Err(AuthError::AccountDisabled);
        }
        if identity.locked {
            return Err(AuthError::AccountLocked);
        }
        Ok(identity)
    }

    /// A principal name when a suffix is configured, otherwise the DN found
    /// by the service account.
    async fn bind_target(&self, username: &str) -> Result<BindTarget, AuthError> {
        let config = self.ldap.config();
        if let Some(suffix) = &config.principal_suffix {
            return Ok(BindTarget::Principal(if username.contains('@') {
                username.to_owned()
            } else {
                format!("{username}{suffix}")
            }));
        }

        let mut session = self.ldap.open().await?;
        let result = self.locate(&mut session, username).await;
        session.close().await;
        result.map(BindTarget::Dn)
    }

    /// Resolve a login name, or failing that a principal name, to a DN.
    async fn locate(
        &self,
        session: &mut Session,
        username: &str,
    ) -> Result<String, AuthError> {
        session
            .bind_service(&self.ldap.config().service)
            .await
            .map_err(|err| match err {
                BindError::ServerUnavailable(_) => AuthError::DirectoryUnavailable,
                err => AuthError::Other(format!("service account bind: {err}")),
            })?;

        if let Some(dn) = self.ldap.find_dn(session, username).await? {
            return Ok(dn);
        }
        if !username.contains('@') {
            return Err(AuthError::UserNotFound);
        }
        self.ldap
            .find_dn_matching(session, self.ldap.principal_filter(username))
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

/// Name a user session binds with.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BindTarget {
    Dn(String),
    Principal(String),
}

impl BindTarget {
    fn name(&self) -> &str {
        match self {
            Self::Dn(name) | Self::Principal(name) => name,
        }
    }

    /// Whether `entry` is the one this target bound as.
    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::Dn(dn) => entry
                .first(DISTINGUISHED_NAME)
                .unwrap_or(&entry.dn)
                .eq_ignore_ascii_case(dn),
            Self::Principal(principal) => entry
                .first(USER_PRINCIPAL_NAME)
                .is_some_and(|upn| upn.eq_ignore_ascii_case(principal)),
        }
    }
}
