// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Capability-typed credentials.
//!
//! A repository talks to two independent services: the OCI registry and
//! the trust service. Each gets its own credential type so that the two
//! can never be swapped by accident; a registry call simply does not
//! accept a [`TrustCredentials`] value and vice versa.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use oci_client::{secrets::RegistryAuth, Reference};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("failed to parse docker auth file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("malformed `auth` entry for registry `{0}`")]
    MalformedEntry(String),
}

/// Docker-style `auth.json` contents.
#[derive(Deserialize, Default)]
struct DockerConfigFile {
    auths: HashMap<String, DockerAuthConfig>,
}

#[derive(Deserialize, Default)]
struct DockerAuthConfig {
    auth: String,
}

/// Looks up the base64 `user:password` entry for the reference's registry.
/// Returns `None` when the file has no entry for that host.
fn credential_for_registry(
    auth_file: &[u8],
    registry: &str,
) -> Result<Option<(String, String)>, CredentialError> {
    let config: DockerConfigFile = serde_json::from_slice(auth_file)?;

    let entry = config
        .auths
        .iter()
        .find(|(host, _)| {
            let host = host
                .strip_prefix("https://")
                .or_else(|| host.strip_prefix("http://"))
                .unwrap_or(host);
            host == registry || host.strip_suffix('/') == Some(registry)
        })
        .map(|(_, auth)| auth);

    let Some(entry) = entry else {
        return Ok(None);
    };

    let decoded = STANDARD
        .decode(&entry.auth)
        .map_err(|_| CredentialError::MalformedEntry(registry.to_string()))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| CredentialError::MalformedEntry(registry.to_string()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| CredentialError::MalformedEntry(registry.to_string()))?;

    Ok(Some((username.to_string(), password.to_string())))
}

/// Credentials for the OCI registry. Only the registry collaborator
/// accepts this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryCredentials {
    Anonymous,
    Basic { username: String, password: String },
}

impl RegistryCredentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        RegistryCredentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Selects the credential for `reference` from a docker-style
    /// `auth.json`. Registries without an entry resolve to anonymous.
    pub fn from_docker_config(
        auth_file: &[u8],
        reference: &Reference,
    ) -> Result<Self, CredentialError> {
        match credential_for_registry(auth_file, reference.resolve_registry())? {
            Some((username, password)) => Ok(RegistryCredentials::Basic { username, password }),
            None => Ok(RegistryCredentials::Anonymous),
        }
    }

    pub(crate) fn to_registry_auth(&self) -> RegistryAuth {
        match self {
            RegistryCredentials::Anonymous => RegistryAuth::Anonymous,
            RegistryCredentials::Basic { username, password } => {
                RegistryAuth::Basic(username.clone(), password.clone())
            }
        }
    }
}

/// Credentials for the trust service. Only the trust collaborator
/// accepts this type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrustCredentials {
    Anonymous,
    Basic { username: String, password: String },
    Token(String),
}

impl TrustCredentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        TrustCredentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(token: impl Into<String>) -> Self {
        TrustCredentials::Token(token.into())
    }

    /// Selects the credential for `reference` from a docker-style
    /// `auth.json` scoped to the trust service.
    pub fn from_docker_config(
        auth_file: &[u8],
        reference: &Reference,
    ) -> Result<Self, CredentialError> {
        match credential_for_registry(auth_file, reference.resolve_registry())? {
            Some((username, password)) => Ok(TrustCredentials::Basic { username, password }),
            None => Ok(TrustCredentials::Anonymous),
        }
    }

    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            TrustCredentials::Anonymous => request,
            TrustCredentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            TrustCredentials::Token(token) => request.bearer_auth(token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    fn auth_file_for(host: &str) -> Vec<u8> {
        let entry = STANDARD.encode("ci-bot:s3cret");
        format!(r#"{{"auths": {{"{host}": {{"auth": "{entry}"}}}}}}"#).into_bytes()
    }

    #[rstest]
    #[case("registry.example.com", true)]
    #[case("https://registry.example.com", true)]
    #[case("http://registry.example.com", true)]
    #[case("other.example.com", false)]
    #[case("registry.example.com.evil.com", false)]
    fn registry_credential_host_matching(#[case] host: &str, #[case] matches: bool) {
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();
        let credentials =
            RegistryCredentials::from_docker_config(&auth_file_for(host), &reference).unwrap();
        let expected = if matches {
            RegistryCredentials::basic("ci-bot", "s3cret")
        } else {
            RegistryCredentials::Anonymous
        };
        assert_eq!(credentials, expected);
    }

    #[test]
    fn trust_credential_from_docker_config() {
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();
        let credentials =
            TrustCredentials::from_docker_config(&auth_file_for("registry.example.com"), &reference)
                .unwrap();
        assert_eq!(credentials, TrustCredentials::basic("ci-bot", "s3cret"));
    }

    #[test]
    fn malformed_auth_entry() {
        let auth_file = r#"{"auths": {"registry.example.com": {"auth": "%%%"}}}"#;
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();
        let result = RegistryCredentials::from_docker_config(auth_file.as_bytes(), &reference);
        assert!(matches!(result, Err(CredentialError::MalformedEntry(_))));
    }

    #[test]
    fn registry_auth_mapping() {
        let auth = RegistryCredentials::basic("user", "pass").to_registry_auth();
        assert!(matches!(auth, RegistryAuth::Basic(u, p) if u == "user" && p == "pass"));
        let auth = RegistryCredentials::Anonymous.to_registry_auth();
        assert!(matches!(auth, RegistryAuth::Anonymous));
    }
}
