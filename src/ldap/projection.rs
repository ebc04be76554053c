//! Directory entry to application identity.

use serde::{Deserialize, Serialize};

use crate::ldap::entry::{DirectoryEntry, THUMBNAIL_ATTRIBUTE};
use crate::ldap::error::AuthError;

/// `userAccountControl` flag for a disabled account.
pub const ACCOUNT_DISABLE: u32 = 0x0002;

const MAIL: &str = "mail";
const DISPLAY_NAME: &str = "displayName";
pub(crate) const DISTINGUISHED_NAME: &str = "distinguishedName";
const MEMBER_OF: &str = "memberOf";
const USER_ACCOUNT_CONTROL: &str = "userAccountControl";
const LOCKOUT_TIME: &str = "lockoutTime";
pub(crate) const USER_PRINCIPAL_NAME: &str = "userPrincipalName";

/// Attributes requested when authenticating a user.
pub fn identity_attributes(username_attribute: &str) -> Vec<String> {
    [
        username_attribute,
        USER_PRINCIPAL_NAME,
        DISPLAY_NAME,
        MAIL,
        DISTINGUISHED_NAME,
        MEMBER_OF,
        USER_ACCOUNT_CONTROL,
        LOCKOUT_TIME,
        THUMBNAIL_ATTRIBUTE,
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// User as seen by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedIdentity {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: String,
    pub dn: String,
    /// Server order. Callers must not rely on it.
    pub groups: Vec<String>,
    pub disabled: bool,
    pub locked: bool,
    #[serde(skip)]
    pub photo: Option<Vec<u8>>,
}

/// Whether one of `groups` (DNs) contains one of `wanted`, ignoring case.
/// Blank entries of `wanted` never match.
pub fn member_of_any(groups: &[String], wanted: &[String]) -> bool {
    wanted.iter().any(|wanted| {
        let wanted = wanted.trim().to_lowercase();
        !wanted.is_empty()
            && groups
                .iter()
                .any(|group| group.to_lowercase().contains(&wanted))
    })
}

/// Project `entry` into a [`NormalizedIdentity`].
///
/// Only a missing username is an error; anything else missing or malformed
/// becomes an absent field.
pub fn project(
    entry: &DirectoryEntry,
    username_attribute: &str,
) -> Result<NormalizedIdentity, AuthError> {
    let username = entry
        .first(username_attribute)
        .filter(|username| !username.is_empty())
        .ok_or_else(|| {
            AuthError::Other(format!(
                "entry {} has no `{username_attribute}`",
                entry.dn
            ))
        })?
        .to_owned();

    let account_control = entry
        .first(USER_ACCOUNT_CONTROL)
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or_default();
    let lockout_time = entry
        .first(LOCKOUT_TIME)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or_default();

    Ok(NormalizedIdentity {
        id: username.clone(),
        email: entry
            .first(MAIL)
            .filter(|mail| !mail.is_empty())
            .map(str::to_owned),
        name: entry
            .first(DISPLAY_NAME)
            .filter(|name| !name.is_empty())
            .unwrap_or(&username)
            .to_owned(),
        dn: entry
            .first(DISTINGUISHED_NAME)
            .unwrap_or(&entry.dn)
            .to_owned(),
        groups: entry.values(MEMBER_OF).to_vec(),
        disabled: account_control & ACCOUNT_DISABLE != 0,
        locked: lockout_time > 0,
        photo: entry
            .first_bytes(THUMBNAIL_ATTRIBUTE)
            .filter(|photo| !photo.is_empty())
            .map(<[u8]>::to_vec),
        username,
    })
}
