//! In-memory directory recording every protocol call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::ldap::entry::{AttributeChange, DirectoryEntry};
use crate::ldap::error::{
    BindError, ConnectError, ModifyError, SearchError, code,
};
use crate::ldap::session::{
    Connector, DirectoryEndpoint, Scope, SearchRequest, ServiceAccount,
    Transport,
};

pub const BASE_DN: &str = "DC=corp,DC=com";
pub const SERVICE_DN: &str = "CN=svc-portal,CN=Users,DC=corp,DC=com";
pub const SERVICE_PASSWORD: &str = "svc-Secret-1";
pub const JDOE_DN: &str = "CN=John Doe,OU=Staff,DC=corp,DC=com";
pub const JDOE_PASSWORD: &str = "Corr3ct-Horse";
pub const DISABLED_DN: &str = "CN=Ann Smith,OU=Staff,DC=corp,DC=com";
pub const LOCKED_DN: &str = "CN=Bob Stone,OU=Staff,DC=corp,DC=com";
pub const ADMIN_DN: &str = "CN=Ada Admin,OU=IT,DC=corp,DC=com";
pub const OTHER_PASSWORD: &str = "Other-Pa55word";
/// New passwords shorter than this are rejected like an AD policy would.
pub const MIN_PASSWORD_LENGTH: usize = 10;

/// Protocol calls seen by the directory.
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub connects: usize,
    pub binds: usize,
    pub bind_names: Vec<String>,
    pub searches: usize,
    pub modifies: usize,
    pub modified: Vec<(String, Vec<AttributeChange>)>,
    pub unbinds: usize,
    pub released: usize,
}

impl Calls {
    /// Transports opened and not yet closed or released.
    pub fn open_sessions(&self) -> usize {
        self.connects - self.unbinds - self.released
    }
}

#[derive(Debug, Default)]
struct State {
    users: Vec<(DirectoryEntry, String)>,
    calls: Calls,
    unreachable: bool,
    stall_searches: bool,
    fail_searches: bool,
    reject_service: bool,
}

/// Fake directory server.
#[derive(Debug, Clone)]
pub struct FakeDirectory {
    state: Arc<Mutex<State>>,
}

impl FakeDirectory {
    /// Directory with the service account, `jdoe`, a disabled, a locked and
    /// an admin user.
    pub fn new() -> Self {
        let directory = Self {
            state: Arc::new(Mutex::new(State::default())),
        };

        directory
            .with_user(user(JDOE_DN, "jdoe", "512", "0"), JDOE_PASSWORD)
            .with_user(user(DISABLED_DN, "asmith", "514", "0"), OTHER_PASSWORD)
            .with_user(
                user(LOCKED_DN, "bstone", "512", "133497043200000000"),
                OTHER_PASSWORD,
            )
            .with_user(
                user(ADMIN_DN, "ada", "512", "0").with_attr(
                    "memberOf",
                    "CN=Portal Admins,OU=Groups,DC=corp,DC=com",
                ),
                OTHER_PASSWORD,
            )
    }

    pub fn with_user(self, entry: DirectoryEntry, password: &str) -> Self {
        self.lock().users.push((entry, password.to_owned()));
        self
    }

    pub fn unreachable(self) -> Self {
        self.lock().unreachable = true;
        self
    }

    pub fn stall_searches(self) -> Self {
        self.lock().stall_searches = true;
        self
    }

    pub fn fail_searches(self) -> Self {
        self.lock().fail_searches = true;
        self
    }

    pub fn reject_service(self) -> Self {
        self.lock().reject_service = true;
        self
    }

    pub fn endpoint(&self) -> DirectoryEndpoint {
        DirectoryEndpoint {
            url: "ldaps://dc.corp.com:636".into(),
            verify_certificate: true,
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
        }
    }

    pub fn service(&self) -> ServiceAccount {
        ServiceAccount {
            dn: SERVICE_DN.into(),
            password: SERVICE_PASSWORD.into(),
        }
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls.clone()
    }

    /// Current password of `dn`.
    pub fn password_of(&self, dn: &str) -> Option<String> {
        self.lock()
            .users
            .iter()
            .find(|(entry, _)| entry.dn == dn)
            .map(|(_, password)| password.clone())
    }

    /// Current entry of `dn`.
    pub fn entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.lock()
            .users
            .iter()
            .find(|(entry, _)| entry.dn == dn)
            .map(|(entry, _)| entry.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

/// Minimal AD user entry.
pub fn user(
    dn: &str,
    username: &str,
    account_control: &str,
    lockout_time: &str,
) -> DirectoryEntry {
    DirectoryEntry::new(dn)
        .with_attr("objectClass", "user")
        .with_attr("sAMAccountName", username)
        .with_attr("userPrincipalName", format!("{username}@corp.com"))
        .with_attr("mail", format!("{username}@corp.com"))
        .with_attr("distinguishedName", dn)
        .with_attr("userAccountControl", account_control)
        .with_attr("lockoutTime", lockout_time)
}

#[async_trait]
impl Connector for FakeDirectory {
    async fn connect(
        &self,
        _endpoint: &DirectoryEndpoint,
    ) -> Result<Box<dyn Transport>, ConnectError> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(ConnectError::Unreachable("connection refused".into()));
        }
        state.calls.connects += 1;

        Ok(Box::new(FakeTransport {
            state: Arc::clone(&self.state),
            unbound: false,
        }))
    }
}

struct FakeTransport {
    state: Arc<Mutex<State>>,
    unbound: bool,
}

impl FakeTransport {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn simple_bind(
        &mut self,
        dn: &str,
        secret: &str,
    ) -> Result<(), BindError> {
        let mut state = self.lock();
        state.calls.binds += 1;
        state.calls.bind_names.push(dn.to_owned());

        if dn == SERVICE_DN {
            return if secret == SERVICE_PASSWORD && !state.reject_service {
                Ok(())
            } else {
                Err(BindError::from_code(code::INVALID_CREDENTIALS, ""))
            };
        }

        let valid = !secret.is_empty()
            && state.users.iter().any(|(entry, password)| {
                (entry.dn == dn
                    || entry
                        .first("userPrincipalName")
                        .is_some_and(|upn| upn.eq_ignore_ascii_case(dn)))
                    && password == secret
            });

        if valid {
            Ok(())
        } else {
            Err(BindError::from_code(
                code::INVALID_CREDENTIALS,
                "80090308: LdapErr: DSID-0C09041C, data 52e",
            ))
        }
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
        _time_limit: Duration,
    ) -> Result<Vec<DirectoryEntry>, SearchError> {
        let (stall, entries) = {
            let mut state = self.lock();
            state.calls.searches += 1;
            if state.fail_searches {
                return Err(SearchError::Other("operations error".into()));
            }

            let terms = equality_terms(&request.filter);
            let entries = state
                .users
                .iter()
                .filter(|(entry, _)| match request.scope {
                    Scope::Base => entry.dn.eq_ignore_ascii_case(&request.base),
                    Scope::OneLevel | Scope::Subtree => {
                        terms.iter().any(|(attr, value)| {
                            entry
                                .values(attr)
                                .iter()
                                .any(|v| v.eq_ignore_ascii_case(value))
                        })
                    },
                })
                .map(|(entry, _)| entry.clone())
                .collect::<Vec<_>>();
            (state.stall_searches, entries)
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(entries)
    }

    async fn modify(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), ModifyError> {
        let mut state = self.lock();
        state.calls.modifies += 1;
        state.calls.modified.push((dn.to_owned(), changes.to_vec()));

        let new_password = match changes.iter().find(|c| c.is_secret()) {
            Some(change) => {
                let password = decode_password(&change.values[0]);
                if password.chars().count() < MIN_PASSWORD_LENGTH {
                    return Err(ModifyError::from_code(
                        code::CONSTRAINT_VIOLATION,
                        "0000052D: Constraint violation",
                    ));
                }
                Some(password)
            },
            None => None,
        };

        let Some((entry, password)) =
            state.users.iter_mut().find(|(entry, _)| entry.dn == dn)
        else {
            return Err(ModifyError::from_code(code::NO_SUCH_OBJECT, ""));
        };

        for change in changes.iter().filter(|c| !c.is_secret()) {
            entry
                .bin_attrs
                .insert(change.attribute.clone(), change.values.clone());
        }
        if let Some(new_password) = new_password {
            *password = new_password;
        }
        Ok(())
    }

    async fn unbind(&mut self) {
        self.unbound = true;
        self.lock().calls.unbinds += 1;
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        if !self.unbound {
            self.lock().calls.released += 1;
        }
    }
}

/// Every `(attr=value)` term of a filter, except `objectClass`.
fn equality_terms(filter: &str) -> Vec<(String, String)> {
    filter
        .split(['(', ')'])
        .filter_map(|term| term.split_once('='))
        .filter(|(attr, _)| {
            !attr.is_empty() && !attr.eq_ignore_ascii_case("objectClass")
        })
        .map(|(attr, value)| (attr.to_owned(), value.to_owned()))
        .collect()
}

/// Reverse of [`crate::ldap::entry::encode_password`].
pub fn decode_password(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();
    String::from_utf16_lossy(&units)
        .trim_matches('"')
        .to_owned()
}

#[test]
fn test_equality_terms() {
    assert_eq!(
        equality_terms(
            "(&(objectClass=user)(|(sAMAccountName=jdoe)(userPrincipalName=jdoe)))"
        ),
        vec![
            ("sAMAccountName".to_owned(), "jdoe".to_owned()),
            ("userPrincipalName".to_owned(), "jdoe".to_owned()),
        ]
    );
}
