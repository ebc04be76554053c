//! LDAP support.
//!
//! Each workflow ([`CredentialVerifier`], [`AttributeWriter`],
//! [`ExistenceChecker`]) opens its own [`Session`]s through [`Ldap`] and
//! closes them before returning. Nothing is pooled or cached.

mod client;
pub mod entry;
pub mod error;
mod existence;
pub mod projection;
pub mod session;
mod verifier;
mod writer;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

pub use client::LdapConnector;
pub use entry::{AttributeChange, DirectoryEntry};
pub use error::{AuthError, CheckError, WriteError};
pub use existence::ExistenceChecker;
pub use projection::NormalizedIdentity;
pub use session::{
    Connector, DirectoryEndpoint, SearchRequest, ServiceAccount, Session,
};
pub use verifier::CredentialVerifier;
pub use writer::{AttributeWriter, VerifiedCaller, WriteRequest};

use crate::ldap::error::{ConnectError, SearchError};

const DISTINGUISHED_NAME: &str = "distinguishedName";

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub endpoint: DirectoryEndpoint,
    pub base_dn: String,
    /// Attribute holding the login name, `sAMAccountName` on AD.
    pub username_attribute: String,
    /// Appended to usernames to bind with a user principal name.
    pub principal_suffix: Option<String>,
    pub service: ServiceAccount,
}

/// LDAP manager to open sessions.
#[derive(Clone)]
pub struct Ldap {
    connector: Arc<dyn Connector>,
    config: Arc<LdapConfig>,
}

impl Ldap {
    /// Create a new [`Ldap`].
    pub fn new(connector: Arc<dyn Connector>, config: LdapConfig) -> Self {
        Self {
            connector,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Open an unbound session.
    pub async fn open(&self) -> Result<Session, ConnectError> {
        Session::open(self.connector.as_ref(), &self.config.endpoint).await
    }

    /// `(<username attribute>=<username>)`.
    pub fn username_filter(&self, username: &str) -> String {
        format!(
            "({}={})",
            self.config.username_attribute,
            ldap3::ldap_escape(username)
        )
    }

    /// `(&(objectClass=user)(userPrincipalName=<name>))`.
    pub fn principal_filter(&self, principal: &str) -> String {
        format!(
            "(&(objectClass=user)(userPrincipalName={}))",
            ldap3::ldap_escape(principal)
        )
    }

    /// Discover the DN of `username` on a bound session.
    pub async fn find_dn(
        &self,
        session: &mut Session,
        username: &str,
    ) -> Result<Option<String>, SearchError> {
        self.find_dn_matching(session, self.username_filter(username))
            .await
    }

    /// DN of the first entry matching `filter`. Entries without a DN are
    /// treated as absent.
    pub async fn find_dn_matching(
        &self,
        session: &mut Session,
        filter: String,
    ) -> Result<Option<String>, SearchError> {
        let request = SearchRequest::subtree(&self.config.base_dn, filter)
            .attributes([DISTINGUISHED_NAME])
            .limit(1);

        Ok(session
            .search(&request)
            .await?
            .into_iter()
            .next()
            .map(|entry| {
                if entry.dn.is_empty() {
                    entry
                        .first(DISTINGUISHED_NAME)
                        .map(str::to_owned)
                        .unwrap_or_default()
                } else {
                    entry.dn
                }
            })
            .filter(|dn| !dn.trim().is_empty()))
    }

    pub fn verifier(&self) -> CredentialVerifier {
        CredentialVerifier::new(self.clone())
    }

    pub fn writer(&self, admin_groups: Vec<String>) -> AttributeWriter {
        AttributeWriter::new(self.clone(), admin_groups)
    }

    pub fn existence(&self) -> ExistenceChecker {
        ExistenceChecker::new(self.clone())
    }
}

#[cfg(test)]
pub(crate) fn fake(directory: &testing::FakeDirectory) -> Ldap {
    fake_with_suffix(directory, None)
}

#[cfg(test)]
pub(crate) fn fake_with_suffix(
    directory: &testing::FakeDirectory,
    principal_suffix: Option<&str>,
) -> Ldap {
    Ldap::new(
        Arc::new(directory.clone()),
        LdapConfig {
            endpoint: directory.endpoint(),
            base_dn: testing::BASE_DN.into(),
            username_attribute: "sAMAccountName".into(),
            principal_suffix: principal_suffix.map(str::to_owned),
            service: directory.service(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::DirectoryEntry;
    use crate::ldap::testing::{FakeDirectory, JDOE_DN, OTHER_PASSWORD};

    #[test]
    fn test_filters_are_escaped() {
        let ldap = fake(&FakeDirectory::new());
        assert_eq!(
            ldap.username_filter("j*)(uid=*"),
            r"(sAMAccountName=j\2a\29\28uid=\2a)"
        );
        assert_eq!(
            ldap.principal_filter("j*@corp.com"),
            r"(&(objectClass=user)(userPrincipalName=j\2a@corp.com))"
        );
    }

    #[tokio::test]
    async fn test_find_dn() {
        let directory = FakeDirectory::new();
        let ldap = fake(&directory);

        let mut session = ldap.open().await.unwrap();
        session.bind_service(&directory.service()).await.unwrap();

        assert_eq!(
            ldap.find_dn(&mut session, "jdoe").await.unwrap().as_deref(),
            Some(JDOE_DN)
        );
        assert_eq!(ldap.find_dn(&mut session, "nobody").await.unwrap(), None);
        session.close().await;
    }

    #[tokio::test]
    async fn test_entry_without_dn_is_absent() {
        let directory = FakeDirectory::new().with_user(
            DirectoryEntry::new("")
                .with_attr("objectClass", "user")
                .with_attr("sAMAccountName", "ghost"),
            OTHER_PASSWORD,
        );
        let ldap = fake(&directory);

        let mut session = ldap.open().await.unwrap();
        session.bind_service(&directory.service()).await.unwrap();
        assert_eq!(ldap.find_dn(&mut session, "ghost").await.unwrap(), None);
        session.close().await;
    }
}
