// src/credentials.rs

//! Credential lookup for object storage access.
//!
//! Tasks only ever see the `resolve(id) -> Credentials` contract; where the
//! key material comes from is up to the provider.

use std::collections::HashMap;
use std::fmt::{self, Debug};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credentials found for '{id}' ({hint})")]
    Missing { id: String, hint: String },
}

/// Access/secret key pair. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync + Debug {
    fn resolve(&self, id: &str) -> Result<Credentials, CredentialError>;
}

/// Reads `STARDAG_CRED_<ID>_ACCESS_KEY` and `STARDAG_CRED_<ID>_SECRET_KEY`.
///
/// `<ID>` is the credential id upper-cased with every non-alphanumeric
/// character replaced by `_` (`aws_credentials` → `AWS_CREDENTIALS`).
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn var_names(id: &str) -> (String, String) {
        let normalized: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        (
            format!("STARDAG_CRED_{normalized}_ACCESS_KEY"),
            format!("STARDAG_CRED_{normalized}_SECRET_KEY"),
        )
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn resolve(&self, id: &str) -> Result<Credentials, CredentialError> {
        let (access_var, secret_var) = Self::var_names(id);
        match (std::env::var(&access_var), std::env::var(&secret_var)) {
            (Ok(access), Ok(secret)) => Ok(Credentials::new(access, secret)),
            _ => Err(CredentialError::Missing {
                id: id.to_string(),
                hint: format!("set {access_var} and {secret_var}"),
            }),
        }
    }
}

/// Fixed in-memory credentials, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    entries: HashMap<String, Credentials>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(id.into(), credentials);
        self
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn resolve(&self, id: &str) -> Result<Credentials, CredentialError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| CredentialError::Missing {
                id: id.to_string(),
                hint: "not registered with the static provider".to_string(),
            })
    }
}
