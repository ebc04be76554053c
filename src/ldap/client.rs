//! [`ldap3`] transport.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::{
    Ldap as Ldap3, LdapConnAsync, LdapConnSettings, LdapError, Mod,
    SearchEntry, SearchOptions, SearchResult,
};

use crate::ldap::entry::{AttributeChange, ChangeKind, DirectoryEntry};
use crate::ldap::error::{
    BindError, ConnectError, ModifyError, SearchError, code,
};
use crate::ldap::session::{
    Connector, DirectoryEndpoint, Scope, SearchRequest, Transport,
};

/// Opens real LDAP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapConnector;

#[async_trait]
impl Connector for LdapConnector {
    async fn connect(
        &self,
        endpoint: &DirectoryEndpoint,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(endpoint.connect_timeout)
            .set_no_tls_verify(!endpoint.verify_certificate);

        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &endpoint.url)
                .await
                .map_err(|err| match err {
                    LdapError::Timeout { .. } => ConnectError::Timeout,
                    err => ConnectError::Unreachable(err.to_string()),
                })?;

        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                tracing::warn!(error = %err, "ldap connection driver error");
            }
        });

        Ok(Box::new(LdapTransport {
            ldap,
            timeout: endpoint.operation_timeout,
        }))
    }
}

/// One `ldap3` connection. Dropping the handle stops the driver.
struct LdapTransport {
    ldap: Ldap3,
    timeout: Duration,
}

#[async_trait]
impl Transport for LdapTransport {
    async fn simple_bind(
        &mut self,
        dn: &str,
        secret: &str,
    ) -> Result<(), BindError> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, secret)
            .await
            .map_err(|err| BindError::ServerUnavailable(err.to_string()))?;

        match result.rc {
            code::SUCCESS => Ok(()),
            rc => Err(BindError::from_code(rc, result.text)),
        }
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        time_limit: Duration,
    ) -> Result<Vec<DirectoryEntry>, SearchError> {
        let options = SearchOptions::new()
            .sizelimit(i32::try_from(request.limit).unwrap_or(i32::MAX))
            .timelimit(
                i32::try_from(time_limit.as_secs().max(1)).unwrap_or(i32::MAX),
            );
        let scope = match request.scope {
            Scope::Base => ldap3::Scope::Base,
            Scope::OneLevel => ldap3::Scope::OneLevel,
            Scope::Subtree => ldap3::Scope::Subtree,
        };

        let SearchResult(entries, result) = self
            .ldap
            .with_search_options(options)
            .with_timeout(self.timeout)
            .search(&request.base, scope, &request.filter, &request.attributes)
            .await
            .map_err(|err| match err {
                LdapError::Timeout { .. } => SearchError::Timeout,
                err => SearchError::Other(err.to_string()),
            })?;

        match result.rc {
            code::SUCCESS | code::SIZE_LIMIT_EXCEEDED => Ok(entries
                .into_iter()
                .map(|entry| {
                    let entry = SearchEntry::construct(entry);
                    DirectoryEntry {
                        dn: entry.dn,
                        attrs: entry.attrs,
                        bin_attrs: entry.bin_attrs,
                    }
                })
                .collect()),
            code::TIME_LIMIT_EXCEEDED => Err(SearchError::Timeout),
            rc => Err(SearchError::Other(format!("code {rc}: {}", result.text))),
        }
    }

    async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), ModifyError> {
        let mods = changes
            .iter()
            .map(|change| match change.kind {
                ChangeKind::Replace => Mod::Replace(
                    change.attribute.as_bytes().to_vec(),
                    change.values.iter().cloned().collect::<HashSet<_>>(),
                ),
            })
            .collect::<Vec<_>>();

        let result = self
            .ldap
            .with_timeout(self.timeout)
            .modify(dn, mods)
            .await
            .map_err(|err| ModifyError::Other(err.to_string()))?;

        match result.rc {
            code::SUCCESS => Ok(()),
            rc => Err(ModifyError::from_code(rc, result.text)),
        }
    }

    async fn unbind(&mut self) {
        if let Err(err) = self.ldap.unbind().await {
            tracing::debug!(error = %err, "ldap unbind failed");
        }
    }
}
