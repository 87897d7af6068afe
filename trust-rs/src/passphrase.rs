// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Passphrase retrieval for signing keys.
//!
//! The key store never performs interactive I/O itself. Whenever it needs
//! to create or unlock a key it asks an injected [`PassphraseRetriever`],
//! passing the key name, the role alias and whether the key is being
//! created for the first time.

use thiserror::Error;
use zeroize::Zeroizing;

pub type PassphraseResult = std::result::Result<Zeroizing<String>, PassphraseError>;

#[derive(Error, Debug)]
pub enum PassphraseError {
    #[error("passphrase retrieval declined for key `{0}`")]
    Declined(String),

    #[error("passphrase unavailable: {0}")]
    Unavailable(String),
}

/// Context handed to a retriever for one passphrase request.
#[derive(Debug)]
pub struct KeyRequest<'a> {
    /// Name of the key, typically the repository GUN.
    pub key_name: &'a str,

    /// Role alias the key signs for, e.g. `targets`.
    pub alias: &'a str,

    /// Whether the key is being created rather than unlocked.
    pub is_new: bool,
}

pub trait PassphraseRetriever: Send + Sync {
    fn passphrase(&self, request: &KeyRequest<'_>) -> PassphraseResult;
}

/// Returns one fixed passphrase for every request.
pub struct StaticRetriever {
    passphrase: Zeroizing<String>,
}

impl StaticRetriever {
    pub fn new(passphrase: impl Into<String>) -> Self {
        StaticRetriever {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseRetriever for StaticRetriever {
    fn passphrase(&self, _request: &KeyRequest<'_>) -> PassphraseResult {
        Ok(self.passphrase.clone())
    }
}

/// Reads `<PREFIX>_<ALIAS>_PASSPHRASE` from the process environment.
pub struct EnvRetriever {
    prefix: String,
}

impl EnvRetriever {
    pub fn new(prefix: impl Into<String>) -> Self {
        EnvRetriever {
            prefix: prefix.into(),
        }
    }

    fn variable(&self, alias: &str) -> String {
        format!(
            "{}_{}_PASSPHRASE",
            self.prefix.to_uppercase(),
            alias.to_uppercase()
        )
    }
}

impl PassphraseRetriever for EnvRetriever {
    fn passphrase(&self, request: &KeyRequest<'_>) -> PassphraseResult {
        let variable = self.variable(request.alias);
        match std::env::var(&variable) {
            Ok(value) => Ok(Zeroizing::new(value)),
            Err(std::env::VarError::NotPresent) => {
                Err(PassphraseError::Declined(request.key_name.to_string()))
            }
            Err(e) => Err(PassphraseError::Unavailable(format!("{variable}: {e}"))),
        }
    }
}

/// Declines every request. Used where signing must not happen.
pub struct DecliningRetriever;

impl PassphraseRetriever for DecliningRetriever {
    fn passphrase(&self, request: &KeyRequest<'_>) -> PassphraseResult {
        Err(PassphraseError::Declined(request.key_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(key_name: &'a str, alias: &'a str) -> KeyRequest<'a> {
        KeyRequest {
            key_name,
            alias,
            is_new: false,
        }
    }

    #[test]
    fn static_retriever_always_answers() {
        let retriever = StaticRetriever::new("hunter2");
        let passphrase = retriever
            .passphrase(&request("example.com/app", "targets"))
            .unwrap();
        assert_eq!(passphrase.as_str(), "hunter2");
    }

    #[test]
    fn env_retriever_reads_prefixed_variable() {
        std::env::set_var("TRUST_RS_TEST_TARGETS_PASSPHRASE", "from-env");
        let retriever = EnvRetriever::new("trust_rs_test");
        let passphrase = retriever
            .passphrase(&request("example.com/app", "targets"))
            .unwrap();
        assert_eq!(passphrase.as_str(), "from-env");
        std::env::remove_var("TRUST_RS_TEST_TARGETS_PASSPHRASE");
    }

    #[test]
    fn env_retriever_declines_when_unset() {
        let retriever = EnvRetriever::new("trust_rs_unset");
        let result = retriever.passphrase(&request("example.com/app", "targets"));
        assert!(matches!(result, Err(PassphraseError::Declined(_))));
    }

    #[test]
    fn declining_retriever_declines() {
        let result = DecliningRetriever.passphrase(&request("example.com/app", "targets"));
        assert!(matches!(result, Err(PassphraseError::Declined(_))));
    }
}
