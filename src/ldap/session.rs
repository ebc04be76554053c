//! One live directory connection.
//!
//! A [`Session`] owns a [`Transport`] obtained from a [`Connector`]. It
//! tracks the identity it is bound as and refuses search/modify until a bind
//! succeeded. Every operation is bounded by the endpoint timeouts. A session
//! must be closed with [`Session::close`]; dropping an open session releases
//! the transport without the unbind round trip.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::ldap::entry::{AttributeChange, DirectoryEntry};
use crate::ldap::error::{
    BindError, ConnectError, ModifyError, SearchError, SessionFault,
};

/// Connection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEndpoint {
    pub url: String,
    pub verify_certificate: bool,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
}

/// Search depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Base,
    OneLevel,
    Subtree,
}

/// Parameters of one search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub filter: String,
    pub attributes: Vec<String>,
    /// Maximum entries returned, `0` for no cap.
    pub limit: usize,
}

impl SearchRequest {
    /// Subtree search under `base`.
    pub fn subtree(base: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            scope: Scope::Subtree,
            filter: filter.into(),
            attributes: Vec::new(),
            limit: 0,
        }
    }

    /// Read the single entry at `dn`.
    pub fn base_object(dn: impl Into<String>) -> Self {
        Self {
            base: dn.into(),
            scope: Scope::Base,
            filter: "(objectClass=*)".to_owned(),
            attributes: Vec::new(),
            limit: 1,
        }
    }

    /// Restrict returned attributes.
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Cap the number of entries.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Opens transports to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &DirectoryEndpoint,
    ) -> Result<Box<dyn Transport>, ConnectError>;
}

/// Raw protocol operations over one connection.
///
/// Dropping a transport must release the underlying connection.
#[async_trait]
pub trait Transport: Send {
    async fn simple_bind(&mut self, dn: &str, secret: &str)
    -> Result<(), BindError>;

    async fn search(
        &mut self,
        request: &SearchRequest,
        time_limit: Duration,
    ) -> Result<Vec<DirectoryEntry>, SearchError>;

    async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), ModifyError>;

    async fn unbind(&mut self);
}

/// Kind of identity a session is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Service,
    User,
}

/// Identity of a bound session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindIdentity {
    pub name: String,
    pub kind: IdentityKind,
}

/// Directory service account.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceAccount {
    pub dn: String,
    pub password: String,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("dn", &self.dn)
            .finish_non_exhaustive()
    }
}

/// One live connection.
pub struct Session {
    endpoint: DirectoryEndpoint,
    transport: Option<Box<dyn Transport>>,
    identity: Option<BindIdentity>,
}

impl Session {
    /// Connect to `endpoint`. Does not bind.
    pub async fn open(
        connector: &dyn Connector,
        endpoint: &DirectoryEndpoint,
    ) -> Result<Self, ConnectError> {
        let transport = tokio::time::timeout(
            endpoint.connect_timeout,
            connector.connect(endpoint),
        )
        .await
        .map_err(|_| ConnectError::Timeout)??;

        tracing::trace!(url = %endpoint.url, "directory session opened");

        Ok(Self {
            endpoint: endpoint.clone(),
            transport: Some(transport),
            identity: None,
        })
    }

    /// Identity the session is currently bound as.
    pub fn identity(&self) -> Option<&BindIdentity> {
        self.identity.as_ref()
    }

    /// Whether [`Session::close`] already ran.
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Authenticate as an end user. Replaces any previous identity.
    pub async fn bind(&mut self, dn: &str, secret: &str) -> Result<(), BindError> {
        self.bind_as(dn, secret, IdentityKind::User).await
    }

    /// Authenticate as the service account.
    pub async fn bind_service(
        &mut self,
        account: &ServiceAccount,
    ) -> Result<(), BindError> {
        self.bind_as(&account.dn, &account.password, IdentityKind::Service)
            .await
    }

    async fn bind_as(
        &mut self,
        dn: &str,
        secret: &str,
        kind: IdentityKind,
    ) -> Result<(), BindError> {
        let timeout = self.endpoint.operation_timeout;
        // The previous identity is gone as soon as a bind is attempted.
        self.identity = None;

        let transport = self.transport.as_mut().ok_or(SessionFault::Closed)?;
        bounded(timeout, transport.simple_bind(dn, secret))
            .await
            .unwrap_or_else(|| {
                Err(BindError::ServerUnavailable("bind timed out".into()))
            })?;

        self.identity = Some(BindIdentity {
            name: dn.to_owned(),
            kind,
        });
        Ok(())
    }

    /// Fail unless bound as the service account.
    pub fn ensure_privileged(&self) -> Result<(), SessionFault> {
        match (&self.transport, &self.identity) {
            (None, _) => Err(SessionFault::Closed),
            (Some(_), None) => Err(SessionFault::NotBound),
            (Some(_), Some(identity))
                if identity.kind == IdentityKind::Service =>
            {
                Ok(())
            },
            (Some(_), Some(_)) => Err(SessionFault::NotPrivileged),
        }
    }

    /// Run a search.
    pub async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, SearchError> {
        let timeout = self.endpoint.operation_timeout;
        let transport = self.ready()?;

        let mut entries = bounded(timeout, transport.search(request, timeout))
            .await
            .unwrap_or(Err(SearchError::Timeout))?;

        if request.limit > 0 {
            entries.truncate(request.limit);
        }
        Ok(entries)
    }

    /// Apply `changes` to `dn` in one request.
    pub async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), ModifyError> {
        let timeout = self.endpoint.operation_timeout;
        let transport = self.ready()?;

        bounded(timeout, transport.modify(dn, changes))
            .await
            .unwrap_or_else(|| Err(ModifyError::Other("modify timed out".into())))
    }

    /// Unbind and release the transport. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.identity = None;
            // A slow unbind must not hold the request.
            if bounded(self.endpoint.operation_timeout, transport.unbind())
                .await
                .is_none()
            {
                tracing::debug!("directory unbind timed out");
            }
            tracing::trace!(url = %self.endpoint.url, "directory session closed");
        }
    }

    fn ready(&mut self) -> Result<&mut Box<dyn Transport>, SessionFault> {
        match (&mut self.transport, &self.identity) {
            (None, _) => Err(SessionFault::Closed),
            (Some(_), None) => Err(SessionFault::NotBound),
            (Some(transport), Some(_)) => Ok(transport),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!(
                url = %self.endpoint.url,
                "directory session dropped without close, releasing transport"
            );
        }
    }
}

/// Await `future` for at most `duration`.
async fn bounded<F: Future>(duration: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(duration, future).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::testing::{FakeDirectory, JDOE_DN, JDOE_PASSWORD};

    #[tokio::test]
    async fn test_unbound_session_refuses_search_and_modify() {
        let directory = FakeDirectory::new();
        let mut session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();

        let err = session
            .search(&SearchRequest::subtree("DC=corp,DC=com", "(objectClass=*)"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Fault(SessionFault::NotBound)));

        let err = session
            .modify(JDOE_DN, &[AttributeChange::password("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, ModifyError::Fault(SessionFault::NotBound)));

        let calls = directory.calls();
        assert_eq!(calls.searches, 0);
        assert_eq!(calls.modifies, 0);

        session.close().await;
    }

    #[tokio::test]
    async fn test_failed_bind_resets_identity() {
        let directory = FakeDirectory::new();
        let mut session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();

        session.bind(JDOE_DN, JDOE_PASSWORD).await.unwrap();
        assert_eq!(session.identity().unwrap().kind, IdentityKind::User);

        let err = session.bind(JDOE_DN, "wrong").await.unwrap_err();
        assert!(matches!(err, BindError::InvalidCredentials));
        assert!(session.identity().is_none());

        let err = session
            .search(&SearchRequest::subtree("DC=corp,DC=com", "(objectClass=*)"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Fault(SessionFault::NotBound)));
        session.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let directory = FakeDirectory::new();
        let mut session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();
        session.bind_service(&directory.service()).await.unwrap();

        session.close().await;
        session.close().await;
        assert!(session.is_closed());
        assert_eq!(directory.calls().unbinds, 1);

        let err = session.bind(JDOE_DN, JDOE_PASSWORD).await.unwrap_err();
        assert!(matches!(err, BindError::Fault(SessionFault::Closed)));
        assert_eq!(directory.calls().binds, 1);
    }

    #[tokio::test]
    async fn test_privilege_follows_last_bind() {
        let directory = FakeDirectory::new();
        let mut session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();
        assert_eq!(session.ensure_privileged(), Err(SessionFault::NotBound));

        session.bind_service(&directory.service()).await.unwrap();
        assert_eq!(session.ensure_privileged(), Ok(()));

        session.bind(JDOE_DN, JDOE_PASSWORD).await.unwrap();
        assert_eq!(session.ensure_privileged(), Err(SessionFault::NotPrivileged));

        session.close().await;
        assert_eq!(session.ensure_privileged(), Err(SessionFault::Closed));
    }

    #[tokio::test]
    async fn test_dropped_session_releases_transport() {
        let directory = FakeDirectory::new();
        let session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();
        drop(session);

        let calls = directory.calls();
        assert_eq!(calls.unbinds, 0);
        assert_eq!(calls.released, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout() {
        let directory = FakeDirectory::new().stall_searches();
        let mut session =
            Session::open(&directory, &directory.endpoint()).await.unwrap();
        session.bind_service(&directory.service()).await.unwrap();

        let err = session
            .search(&SearchRequest::subtree("DC=corp,DC=com", "(objectClass=*)"))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Timeout));
        session.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let directory = FakeDirectory::new().unreachable();
        let err = Session::open(&directory, &directory.endpoint())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Unreachable(_)));
    }
}
