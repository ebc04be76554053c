//! Configuration manager for the portal.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::AppState;
use crate::ldap::{DirectoryEndpoint, LdapConfig, ServiceAccount};
use crate::photo::PhotoLimits;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
const BIND_PASSWORD_ENV: &str = "LDAP_BIND_PASSWORD";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("missing `{0}` entry on configuration file")]
    Missing(&'static str),
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    /// Groups whose members may update other users.
    #[serde(default)]
    pub admin_groups: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to the directory server.
    #[serde(skip_serializing)]
    pub directory: Option<Directory>,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Option<Token>,
    /// Related to profile photos.
    #[serde(default, skip_serializing)]
    pub photo: Photo,
}

/// Directory configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    /// `ldap://` or `ldaps://` URL.
    pub url: String,
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// Seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Seconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: u64,
    pub base_dn: String,
    #[serde(default = "default_username_attribute")]
    pub username_attribute: String,
    /// e.g. `@corp.com`, binds users with their principal name.
    pub principal_suffix: Option<String>,
    pub service: Option<Service>,
}

/// Service account used for searches and writes.
#[derive(Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub dn: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("dn", &self.dn)
            .finish_non_exhaustive()
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Json Web Token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    pub key_id: Option<String>,
    pub public_key_pem: String,
    pub private_key_pem: String,
    /// Update token audience.
    pub audience: Option<String>,
}

/// Photo upload bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Photo {
    pub thumbnail_size: u32,
    pub thumbnail_max_bytes: usize,
    pub original_max_bytes: usize,
    pub upload_max_bytes: usize,
}

impl Default for Photo {
    fn default() -> Self {
        let limits = PhotoLimits::default();
        Self {
            thumbnail_size: limits.thumbnail_size,
            thumbnail_max_bytes: limits.thumbnail_max_bytes,
            original_max_bytes: limits.original_max_bytes,
            upload_max_bytes: limits.upload_max_bytes,
        }
    }
}

impl From<Photo> for PhotoLimits {
    fn from(photo: Photo) -> Self {
        Self {
            thumbnail_size: photo.thumbnail_size,
            thumbnail_max_bytes: photo.thumbnail_max_bytes,
            original_max_bytes: photo.original_max_bytes,
            upload_max_bytes: photo.upload_max_bytes,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_operation_timeout() -> u64 {
    10
}

fn default_username_attribute() -> String {
    "sAMAccountName".into()
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        Ok(Url::parse(&url_with_scheme)?.to_string())
    }

    /// Reads the configuration file.
    ///
    /// The path is, in order, the one set with [`Configuration::path`],
    /// `CONFIG_PATH` or `config.yaml`.
    pub fn read(self) -> Result<Arc<Self>, ConfigError> {
        let file_path = if self.path.as_os_str().is_empty() {
            std::env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| Path::new(DEFAULT_CONFIG_PATH).to_path_buf())
        } else {
            self.path.clone()
        };

        let file = File::open(&file_path).map_err(|source| ConfigError::Io {
            path: file_path.clone(),
            source,
        })?;
        let mut config: Configuration = serde_yaml::from_reader(file)?;
        config.path = file_path;

        if let Some(directory) = config.directory.as_mut()
            && let Some(service) = directory.service.as_mut()
            && let Ok(password) = std::env::var(BIND_PASSWORD_ENV)
        {
            service.password = password;
        }

        Ok(Arc::new(config.finalize()?))
    }

    /// Set version, normalize URLs and check required entries.
    fn finalize(mut self) -> Result<Self, ConfigError> {
        self.version = VERSION.to_owned();
        self.url = Self::normalize_url(&self.url)?;
        self.ldap()?;
        Ok(self)
    }

    /// Directory settings, failing on missing required entries.
    pub fn ldap(&self) -> Result<LdapConfig, ConfigError> {
        let directory =
            self.directory.as_ref().ok_or(ConfigError::Missing("directory"))?;
        if directory.url.trim().is_empty() {
            return Err(ConfigError::Missing("directory.url"));
        }
        if directory.base_dn.trim().is_empty() {
            return Err(ConfigError::Missing("directory.base_dn"));
        }
        let service = directory
            .service
            .as_ref()
            .ok_or(ConfigError::Missing("directory.service"))?;
        if service.dn.trim().is_empty() {
            return Err(ConfigError::Missing("directory.service.dn"));
        }
        if service.password.is_empty() {
            return Err(ConfigError::Missing("directory.service.password"));
        }

        Ok(LdapConfig {
            endpoint: DirectoryEndpoint {
                url: directory.url.clone(),
                verify_certificate: directory.verify_certificate,
                connect_timeout: Duration::from_secs(directory.connect_timeout),
                operation_timeout: Duration::from_secs(
                    directory.operation_timeout,
                ),
            },
            base_dn: directory.base_dn.clone(),
            username_attribute: directory.username_attribute.clone(),
            principal_suffix: directory
                .principal_suffix
                .clone()
                .filter(|suffix| !suffix.is_empty()),
            service: ServiceAccount {
                dn: service.dn.clone(),
                password: service.password.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name: Portal
url: portal.corp.com
admin_groups: ["Portal Admins"]
directory:
  url: ldaps://dc.corp.com:636
  base_dn: DC=corp,DC=com
  service:
    dn: CN=svc-portal,CN=Users,DC=corp,DC=com
    password: secret
postgres:
  address: localhost:5432
photo:
  thumbnail_size: 128
"#;

    fn parse(yaml: &str) -> Result<Configuration, ConfigError> {
        serde_yaml::from_str::<Configuration>(yaml)?.finalize()
    }

    #[test]
    fn test_read_config() {
        let config = parse(CONFIG).unwrap();
        assert_eq!(config.url, "https://portal.corp.com/");
        assert_eq!(config.version, VERSION);
        assert_eq!(config.admin_groups, vec!["Portal Admins"]);
        assert_eq!(config.photo.thumbnail_size, 128);
        assert_eq!(config.photo.upload_max_bytes, 5 * 1024 * 1024);

        let ldap = config.ldap().unwrap();
        assert!(ldap.endpoint.verify_certificate);
        assert_eq!(ldap.endpoint.connect_timeout, Duration::from_secs(5));
        assert_eq!(ldap.endpoint.operation_timeout, Duration::from_secs(10));
        assert_eq!(ldap.username_attribute, "sAMAccountName");
        assert_eq!(ldap.principal_suffix, None);
    }

    #[test]
    fn test_missing_service_account() {
        let yaml = CONFIG.replace(
            "  service:\n    dn: CN=svc-portal,CN=Users,DC=corp,DC=com\n    password: secret\n",
            "",
        );
        assert!(matches!(
            parse(&yaml),
            Err(ConfigError::Missing("directory.service"))
        ));
    }

    #[test]
    fn test_missing_directory() {
        let config = parse("name: Portal\nurl: https://portal.corp.com\n");
        assert!(matches!(config, Err(ConfigError::Missing("directory"))));
    }

    #[test]
    fn test_missing_file() {
        let err = Configuration::default()
            .path("does/not/exist.yaml".into())
            .read()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_service_password_is_hidden() {
        let config = parse(CONFIG).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret"));
    }
}
