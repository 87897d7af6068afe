// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The trust-service collaborator.
//!
//! [`TrustOperations`] is the contract the adapter consumes: list the
//! signed targets of a repository, publish or sign a target, fetch the
//! trusted target for a tag, revoke a tag. [`notary::NotaryClient`]
//! implements it against a Notary-compatible HTTP service with a local
//! metadata cache.

pub mod keys;
pub mod metadata;
pub mod notary;

use async_trait::async_trait;
use oci_client::Reference;
use thiserror::Error;

use crate::auth::TrustCredentials;
use crate::image::ImageError;
use keys::KeyStoreError;
use metadata::MetadataError;

pub type TrustResult<T> = std::result::Result<T, TrustError>;

#[derive(Error, Debug)]
pub enum TrustError {
    #[error("trust service unavailable: {0}")]
    Unavailable(String),

    #[error("no trust data published for this repository")]
    NoTrustData,

    #[error("no valid signed target for this reference")]
    NotTrusted,

    #[error("failed to publish trust metadata: {0}")]
    Publish(String),

    #[error("signing failed: {0}")]
    Signing(#[from] KeyStoreError),

    #[error("trust metadata invalid: {0}")]
    Metadata(#[from] MetadataError),

    #[error("image artifact: {0}")]
    Artifact(#[from] ImageError),

    #[error("trust cache i/o: {0}")]
    Cache(#[from] std::io::Error),
}

/// A signed record binding a tag to a content digest and length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Tag name, e.g. `v1`.
    pub name: String,

    /// Content digest in `sha256:<hex>` form.
    pub digest: String,

    /// Byte length of the referenced content.
    pub length: u64,
}

#[async_trait]
pub trait TrustOperations: Send + Sync {
    /// All targets currently signed for the repository. An existing but
    /// empty targets role yields an empty vector; a repository with no
    /// published metadata, or only malformed or unverifiable metadata,
    /// yields [`TrustError::NoTrustData`].
    async fn list_targets(
        &self,
        reference: &Reference,
        auth: &TrustCredentials,
    ) -> TrustResult<Vec<Target>>;

    /// Adds or updates `target` in the signed targets metadata and
    /// publishes the new document.
    async fn publish(
        &self,
        reference: &Reference,
        target: &Target,
        auth: &TrustCredentials,
    ) -> TrustResult<()>;

    /// The valid signed target bound to the reference's tag.
    async fn trusted_target(
        &self,
        reference: &Reference,
        auth: &TrustCredentials,
    ) -> TrustResult<Target>;

    /// Signs `target` under the repository's targets role, creating or
    /// unlocking the signing key through the configured passphrase
    /// retriever as needed.
    async fn sign(
        &self,
        reference: &Reference,
        target: &Target,
        auth: &TrustCredentials,
    ) -> TrustResult<()>;

    /// Removes the target entry for `tag` and re-signs the remainder.
    async fn revoke(
        &self,
        reference: &Reference,
        tag: &str,
        auth: &TrustCredentials,
    ) -> TrustResult<()>;
}
