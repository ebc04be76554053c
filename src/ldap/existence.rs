use std::time::Duration;

use crate::ldap::Ldap;
use crate::ldap::error::CheckError;
use crate::ldap::session::Session;
use crate::telemetry;

/// Upper bound of the lookup, tighter than the endpoint timeout.
const SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers whether a username exists, using the service account.
#[derive(Clone)]
pub struct ExistenceChecker {
    ldap: Ldap,
}

impl ExistenceChecker {
    pub fn new(ldap: Ldap) -> Self {
        Self { ldap }
    }

    /// Whether `username` matches an entry.
    ///
    /// A failed search answers `false`. Only an unreachable directory or a
    /// rejected service account is an error.
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, username: &str) -> Result<bool, CheckError> {
        if username.trim().is_empty() {
            return Ok(false);
        }

        let result = self.run(username).await;
        telemetry::directory_operation("exists", result.is_ok());
        result
    }

    async fn run(&self, username: &str) -> Result<bool, CheckError> {
        let mut session = self.ldap.open().await.map_err(|err| {
            tracing::error!(error = %err, "cannot open directory session");
            CheckError::DirectoryUnavailable
        })?;
        let result = self.search(&mut session, username).await;
        session.close().await;
        result
    }

    async fn search(
        &self,
        session: &mut Session,
        username: &str,
    ) -> Result<bool, CheckError> {
        session
            .bind_service(&self.ldap.config().service)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "service account bind failed");
                CheckError::DirectoryUnavailable
            })?;

        match tokio::time::timeout(
            SEARCH_TIMEOUT,
            self.ldap.find_dn(session, username),
        )
        .await
        {
            Ok(Ok(dn)) => Ok(dn.is_some()),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "existence search failed");
                Ok(false)
            },
            Err(_) => {
                tracing::warn!("existence search timed out");
                Ok(false)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::fake;
    use crate::ldap::testing::FakeDirectory;

    #[tokio::test]
    async fn test_exists() {
        let directory = FakeDirectory::new();
        let checker = fake(&directory).existence();

        assert!(checker.exists("jdoe").await.unwrap());
        assert!(checker.exists("JDOE").await.unwrap());
        assert!(!checker.exists("nobody").await.unwrap());
        assert_eq!(directory.calls().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_empty_username() {
        let directory = FakeDirectory::new();
        assert!(!fake(&directory).existence().exists(" ").await.unwrap());
        assert_eq!(directory.calls().connects, 0);
    }

    #[tokio::test]
    async fn test_search_error_is_false() {
        let directory = FakeDirectory::new().fail_searches();
        assert!(!fake(&directory).existence().exists("jdoe").await.unwrap());
        assert_eq!(directory.calls().open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_search_is_false() {
        let directory = FakeDirectory::new().stall_searches();
        assert!(!fake(&directory).existence().exists("jdoe").await.unwrap());
        assert_eq!(directory.calls().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_rejected_service_account() {
        let directory = FakeDirectory::new().reject_service();
        let err = fake(&directory).existence().exists("jdoe").await.unwrap_err();

        assert!(matches!(err, CheckError::DirectoryUnavailable));
        assert_eq!(directory.calls().searches, 0);
        assert_eq!(directory.calls().open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let directory = FakeDirectory::new().unreachable();
        let err = fake(&directory).existence().exists("jdoe").await.unwrap_err();
        assert!(matches!(err, CheckError::DirectoryUnavailable));
    }
}
