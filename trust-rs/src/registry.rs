// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The registry collaborator.
//!
//! [`RegistryOperations`] is the narrow surface the adapter needs from an
//! OCI registry: push an image, resolve a reference to its manifest
//! digest and size. [`OciRegistryClient`] implements it over `oci-client`.

use async_trait::async_trait;
use log::debug;
use oci_client::{
    client::ClientConfig,
    errors::OciDistributionError,
    manifest::{IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE},
    Client, Reference,
};
use thiserror::Error;

use crate::auth::RegistryCredentials;
use crate::image::ImageArtifact;

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to push image to registry: {source}")]
    Push {
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to resolve image manifest: {source}")]
    Pull {
        #[source]
        source: OciDistributionError,
    },

    #[error("failed to construct registry client: {source}")]
    Client {
        #[source]
        source: OciDistributionError,
    },
}

#[async_trait]
pub trait RegistryOperations: Send + Sync {
    /// Uploads the image's blobs and manifest under `reference`.
    async fn push(
        &self,
        reference: &Reference,
        image: &ImageArtifact,
        auth: &RegistryCredentials,
    ) -> RegistryResult<()>;

    /// Resolves `reference` to its manifest digest and manifest size.
    async fn manifest_digest(
        &self,
        reference: &Reference,
        auth: &RegistryCredentials,
    ) -> RegistryResult<(String, u64)>;
}

/// Registry collaborator backed by `oci-client`.
pub struct OciRegistryClient {
    client: Client,
}

impl OciRegistryClient {
    pub fn new(client_config: ClientConfig) -> RegistryResult<Self> {
        let client =
            Client::try_from(client_config).map_err(|source| RegistryError::Client { source })?;
        Ok(OciRegistryClient { client })
    }
}

#[async_trait]
impl RegistryOperations for OciRegistryClient {
    async fn push(
        &self,
        reference: &Reference,
        image: &ImageArtifact,
        auth: &RegistryCredentials,
    ) -> RegistryResult<()> {
        debug!("pushing image to {reference}");
        self.client
            .push(
                reference,
                &image.layers,
                image.config.clone(),
                &auth.to_registry_auth(),
                Some(image.manifest.clone()),
            )
            .await
            .map_err(|source| RegistryError::Push { source })?;
        Ok(())
    }

    async fn manifest_digest(
        &self,
        reference: &Reference,
        auth: &RegistryCredentials,
    ) -> RegistryResult<(String, u64)> {
        let (manifest, digest) = self
            .client
            .pull_manifest_raw(
                reference,
                &auth.to_registry_auth(),
                &[IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE],
            )
            .await
            .map_err(|source| RegistryError::Pull { source })?;
        Ok((digest, manifest.len() as u64))
    }
}
