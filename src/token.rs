//! Manage json web tokens.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ldap::{NormalizedIdentity, VerifiedCaller};

const DEFAULT_AUDIENCE: &str = "portal";
/// Token lifetime in seconds.
pub const EXPIRATION_TIME: u64 = 60 * 15;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("system clock is before unix epoch")]
    Clock(#[from] std::time::SystemTimeError),
}

/// Pieces of information asserted on a JWT.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Recipients that the JWT is intended for.
    pub aud: String,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the organization that issued the JWT.
    pub iss: String,
    /// User ID.
    pub sub: String,
    pub username: String,
    pub dn: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub onboarding_complete: bool,
}

impl Claims {
    /// Caller allowed to write directory attributes.
    pub fn caller(&self) -> VerifiedCaller {
        VerifiedCaller {
            username: self.username.clone(),
            groups: self.groups.clone(),
        }
    }
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    key_id: Option<String>,
    public_key: DecodingKey,
    private_key: EncodingKey,
    name: String,
    audience: String,
}

impl TokenManager {
    /// Create a new [`TokenManager`] instance from P-256 PEM keys.
    pub fn new(
        name: &str,
        key_id: Option<String>,
        public_key_pem: &str,
        private_key_pem: &str,
    ) -> Result<Self, TokenError> {
        Ok(Self {
            algorithm: Algorithm::ES256,
            key_id,
            public_key: DecodingKey::from_ec_pem(public_key_pem.as_bytes())?,
            private_key: EncodingKey::from_ec_pem(private_key_pem.as_bytes())?,
            name: name.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
        })
    }

    /// Set `audience` field on JWT.
    pub fn audience(&mut self, audience: &str) {
        self.audience = audience.to_owned();
    }

    /// Create a new token for `identity`.
    pub fn create(
        &self,
        identity: &NormalizedIdentity,
        onboarding_complete: bool,
    ) -> Result<String, TokenError> {
        self.sign(Claims {
            sub: identity.id.clone(),
            username: identity.username.clone(),
            dn: identity.dn.clone(),
            groups: identity.groups.clone(),
            onboarding_complete,
            ..Default::default()
        })
    }

    /// Issue a fresh token for the holder of `claims`, e.g. once onboarding
    /// is complete.
    pub fn refresh(
        &self,
        claims: &Claims,
        onboarding_complete: bool,
    ) -> Result<String, TokenError> {
        self.sign(Claims {
            onboarding_complete,
            ..claims.clone()
        })
    }

    fn sign(&self, mut claims: Claims) -> Result<String, TokenError> {
        let time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        claims.aud.clone_from(&self.audience);
        claims.iss.clone_from(&self.name);
        claims.iat = time;
        claims.exp = time + EXPIRATION_TIME;

        let mut header = Header::new(self.algorithm);
        header.kid.clone_from(&self.key_id);
        Ok(encode(&header, &claims, &self.private_key)?)
    }

    /// Decode and check a token.
    pub fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[&self.audience]);
        validation.set_issuer(&[&self.name]);
        Ok(decode::<Claims>(token, &self.public_key, &validation)?.claims)
    }
}
