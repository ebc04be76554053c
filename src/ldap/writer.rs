use crate::ldap::Ldap;
use crate::ldap::entry::AttributeChange;
use crate::ldap::error::{BindError, WriteError};
use crate::ldap::projection::member_of_any;
use crate::ldap::session::Session;
use crate::photo::PreparedPhoto;
use crate::telemetry;

/// Caller whose identity was established by a verified token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedCaller {
    pub username: String,
    pub groups: Vec<String>,
}

impl VerifiedCaller {
    /// Callers may change their own entry. Members of an administrative
    /// group may change any entry.
    fn may_write(&self, target: &str, admin_groups: &[String]) -> bool {
        self.username.eq_ignore_ascii_case(target)
            || member_of_any(&self.groups, admin_groups)
    }
}

/// Changes applied in one modify request.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub changes: Vec<AttributeChange>,
    /// Current secret, required when `changes` rotate the password.
    pub old_secret: Option<String>,
}

impl WriteRequest {
    fn rotates_secret(&self) -> bool {
        self.changes.iter().any(AttributeChange::is_secret)
    }
}

/// Writes attributes with the service account.
#[derive(Clone)]
pub struct AttributeWriter {
    ldap: Ldap,
    admin_groups: Vec<String>,
}

impl AttributeWriter {
    pub fn new(ldap: Ldap, admin_groups: Vec<String>) -> Self {
        Self { ldap, admin_groups }
    }

    /// Apply `request` to the entry of `target`.
    ///
    /// A password rotation is only sent once the old secret was proven by a
    /// bind on a separate session. Nothing is written if any step before the
    /// modify fails.
    #[tracing::instrument(skip(self, request, caller), fields(caller = %caller.username))]
    pub async fn apply(
        &self,
        target: &str,
        request: WriteRequest,
        caller: &VerifiedCaller,
    ) -> Result<(), WriteError> {
        let result = self.run(target, &request, caller).await;
        telemetry::directory_operation("write", result.is_ok());

        match &result {
            Ok(()) => tracing::info!(
                attributes = ?request
                    .changes
                    .iter()
                    .map(|change| change.attribute.as_str())
                    .collect::<Vec<_>>(),
                "directory entry updated"
            ),
            Err(err @ (WriteError::DirectoryUnavailable | WriteError::Other(_))) => {
                tracing::error!(error = %err, "directory write failed")
            },
            Err(err) => tracing::warn!(reason = %err, "directory write refused"),
        }
        result
    }

    /// Rotate the password of `target`.
    pub async fn change_password(
        &self,
        target: &str,
        old_secret: &str,
        new_secret: &str,
        caller: &VerifiedCaller,
    ) -> Result<(), WriteError> {
        self.apply(
            target,
            WriteRequest {
                changes: vec![AttributeChange::password(new_secret)],
                old_secret: Some(old_secret.to_owned()),
            },
            caller,
        )
        .await
    }

    /// Replace both photo attributes of `target`.
    pub async fn update_photo(
        &self,
        target: &str,
        photo: PreparedPhoto,
        caller: &VerifiedCaller,
    ) -> Result<(), WriteError> {
        self.apply(
            target,
            WriteRequest {
                changes: vec![
                    AttributeChange::thumbnail(photo.thumbnail),
                    AttributeChange::jpeg(photo.original),
                ],
                old_secret: None,
            },
            caller,
        )
        .await
    }

    async fn run(
        &self,
        target: &str,
        request: &WriteRequest,
        caller: &VerifiedCaller,
    ) -> Result<(), WriteError> {
        if !caller.may_write(target, &self.admin_groups) {
            return Err(WriteError::Unauthorized);
        }
        if request.changes.is_empty() {
            return Err(WriteError::Other("nothing to write".into()));
        }
        if request.rotates_secret()
            && request.old_secret.as_deref().is_none_or(str::is_empty)
        {
            return Err(WriteError::OldSecretInvalid);
        }

        let mut session = self.ldap.open().await?;
        let result = self.write(&mut session, target, request).await;
        session.close().await;
        result
    }

    async fn write(
        &self,
        session: &mut Session,
        target: &str,
        request: &WriteRequest,
    ) -> Result<(), WriteError> {
        session
            .bind_service(&self.ldap.config().service)
            .await
            .map_err(|err| match err {
                BindError::ServerUnavailable(_) => WriteError::DirectoryUnavailable,
                err => {
                    tracing::error!(error = %err, "service account bind rejected");
                    WriteError::Unauthorized
                },
            })?;

        let dn = self
            .ldap
            .find_dn(session, target)
            .await?
            .ok_or(WriteError::UserNotFound)?;

        if request.rotates_secret() {
            let old_secret = request.old_secret.as_deref().unwrap_or_default();
            self.prove_secret(&dn, old_secret).await?;
        }

        session.ensure_privileged()?;
        session.modify(&dn, &request.changes).await?;
        Ok(())
    }

    /// Bind as `dn` on a separate session so the privileged one stays bound.
    async fn prove_secret(&self, dn: &str, secret: &str) -> Result<(), WriteError> {
        let mut session = self.ldap.open().await?;
        let result = session.bind(dn, secret).await;
        session.close().await;

        match result {
            Ok(()) => Ok(()),
            Err(BindError::ServerUnavailable(_)) => {
                Err(WriteError::DirectoryUnavailable)
            },
            Err(_) => Err(WriteError::OldSecretInvalid),
        }
    }
}
