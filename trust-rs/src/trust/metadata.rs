// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Signed targets-role metadata.
//!
//! One JSON document per repository maps tag names to content digests and
//! lengths, carries a version and an expiry, and is signed by the
//! repository's targets key. Serialization is deterministic (struct field
//! order plus `BTreeMap` keys), so the canonical bytes of the `signed`
//! value are simply its JSON encoding. The full TUF role hierarchy
//! (root/snapshot/timestamp) is out of scope here.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::{
    signature::Verifier, Signature as EcdsaSignature, VerifyingKey,
};
use thiserror::Error;

use crate::image::DIGEST_SHA256_PREFIX;
use crate::trust::keys::TargetsKey;
use crate::trust::Target;

/// Role name of the only role this module handles.
pub const TARGETS_ROLE: &str = "targets";

/// Hash algorithm recorded in target entries.
pub const SHA256_HASH: &str = "sha256";

/// Lifetime of a freshly signed targets document.
pub fn targets_expiry() -> Duration {
    Duration::days(365)
}

pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("metadata document is not a targets role (got `{0}`)")]
    WrongType(String),

    #[error("metadata document carries no signatures")]
    Unsigned,

    #[error("metadata expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("signature verification failed")]
    BadSignature,

    #[error("signing key does not match the pinned key")]
    KeyMismatch,

    #[error("malformed digest `{0}`")]
    BadDigest(String),

    #[error("malformed metadata: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Hashes and length of one signed target.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TargetMeta {
    /// Hash algorithm to base64-encoded raw hash.
    pub hashes: BTreeMap<String, String>,
    pub length: u64,
}

/// The signed portion of the document.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TargetsRole {
    #[serde(rename = "_type")]
    pub role_type: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetMeta>,
}

/// One signature over the canonical bytes of [`TargetsRole`].
///
/// The signing public key travels with the signature (SEC1, base64);
/// trust in that key comes from the caller's pin, not from this document.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Signature {
    pub key_id: String,
    pub pub_key: String,
    pub sig: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignedTargets {
    pub signed: TargetsRole,
    pub signatures: Vec<Signature>,
}

fn digest_to_hash(digest: &str) -> MetadataResult<String> {
    let hex_part = digest
        .strip_prefix(DIGEST_SHA256_PREFIX)
        .ok_or_else(|| MetadataError::BadDigest(digest.to_string()))?;
    let raw = hex::decode(hex_part).map_err(|_| MetadataError::BadDigest(digest.to_string()))?;
    Ok(STANDARD.encode(raw))
}

fn hash_to_digest(hash: &str) -> MetadataResult<String> {
    let raw = STANDARD
        .decode(hash)
        .map_err(|_| MetadataError::BadDigest(hash.to_string()))?;
    Ok(format!("{DIGEST_SHA256_PREFIX}{}", hex::encode(raw)))
}

impl SignedTargets {
    /// A fresh, unsigned document with no targets. Version 0 marks it as
    /// never published; [`SignedTargets::sign`] bumps before publishing.
    pub fn empty() -> Self {
        SignedTargets {
            signed: TargetsRole {
                role_type: TARGETS_ROLE.to_string(),
                version: 0,
                expires: Utc::now(),
                targets: BTreeMap::new(),
            },
            signatures: Vec::new(),
        }
    }

    /// Adds or replaces the entry for `target.name`. Returns `false` when
    /// an identical entry already exists, leaving the document untouched.
    pub fn add_target(&mut self, target: &Target) -> MetadataResult<bool> {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256_HASH.to_string(), digest_to_hash(&target.digest)?);
        let meta = TargetMeta {
            hashes,
            length: target.length,
        };

        if self.signed.targets.get(&target.name) == Some(&meta) {
            return Ok(false);
        }
        self.signed.targets.insert(target.name.clone(), meta);
        Ok(true)
    }

    /// Removes the entry for `tag`. Returns `false` when no entry existed.
    pub fn remove_target(&mut self, tag: &str) -> bool {
        self.signed.targets.remove(tag).is_some()
    }

    /// The target recorded for `tag`, if any.
    pub fn target(&self, tag: &str) -> MetadataResult<Option<Target>> {
        let Some(meta) = self.signed.targets.get(tag) else {
            return Ok(None);
        };
        let hash = meta
            .hashes
            .get(SHA256_HASH)
            .ok_or_else(|| MetadataError::BadDigest(tag.to_string()))?;
        Ok(Some(Target {
            name: tag.to_string(),
            digest: hash_to_digest(hash)?,
            length: meta.length,
        }))
    }

    /// All recorded targets, in tag order.
    pub fn targets(&self) -> MetadataResult<Vec<Target>> {
        self.signed
            .targets
            .keys()
            .filter_map(|tag| self.target(tag).transpose())
            .collect()
    }

    fn canonical_bytes(&self) -> MetadataResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.signed)?)
    }

    /// Bumps the version, refreshes the expiry and replaces the signature
    /// set with one signature by `key`.
    pub fn sign(&mut self, key: &TargetsKey) -> MetadataResult<()> {
        self.signed.version += 1;
        self.signed.expires = Utc::now() + targets_expiry();
        let canonical = self.canonical_bytes()?;
        let sig = key.sign(&canonical);
        self.signatures = vec![Signature {
            key_id: key.key_id().to_string(),
            pub_key: key.public_key_b64(),
            sig: STANDARD.encode(sig),
        }];
        Ok(())
    }

    /// Validates role type, expiry and every signature. When `pinned_key`
    /// is given (base64 SEC1), the signing key must match it.
    pub fn verify(&self, pinned_key: Option<&str>, now: DateTime<Utc>) -> MetadataResult<()> {
        if self.signed.role_type != TARGETS_ROLE {
            return Err(MetadataError::WrongType(self.signed.role_type.clone()));
        }
        if self.signatures.is_empty() {
            return Err(MetadataError::Unsigned);
        }
        if self.signed.expires <= now {
            return Err(MetadataError::Expired(self.signed.expires));
        }

        let canonical = self.canonical_bytes()?;
        for signature in &self.signatures {
            if let Some(pinned) = pinned_key {
                if pinned != signature.pub_key {
                    return Err(MetadataError::KeyMismatch);
                }
            }

            let pub_key = STANDARD
                .decode(&signature.pub_key)
                .map_err(|_| MetadataError::BadSignature)?;
            if TargetsKey::key_id_for(&pub_key) != signature.key_id {
                return Err(MetadataError::BadSignature);
            }
            let verifying_key =
                VerifyingKey::from_sec1_bytes(&pub_key).map_err(|_| MetadataError::BadSignature)?;

            let sig = STANDARD
                .decode(&signature.sig)
                .map_err(|_| MetadataError::BadSignature)?;
            let sig =
                EcdsaSignature::from_der(&sig).map_err(|_| MetadataError::BadSignature)?;
            verifying_key
                .verify(&canonical, &sig)
                .map_err(|_| MetadataError::BadSignature)?;
        }

        Ok(())
    }
}
