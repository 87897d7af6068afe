// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The trusted repository adapter.
//!
//! [`TrustedRepository`] binds one image reference to a registry
//! collaborator and a trust-service collaborator, each with its own
//! credentials. Every operation is a single delegation: there is no state
//! carried between calls, no retry logic and no rollback. Failures are
//! logged once here and returned to the caller.

use std::path::Path;

use log::error;
use oci_client::{client::ClientConfig, Reference};
use thiserror::Error;

use crate::auth::{RegistryCredentials, TrustCredentials};
use crate::config::{ConfigError, TrustConfig};
use crate::image::ImageArtifact;
use crate::registry::{OciRegistryClient, RegistryError, RegistryOperations};
use crate::trust::notary::NotaryClient;
use crate::trust::{Target, TrustError, TrustOperations, TrustResult};
use crate::DEFAULT_TAG;

/// Push is two-phase; the variants tell the phases apart. A
/// [`PushError::Trust`] value means the image is reachable in the
/// registry but carries no trust record.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("registry push failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("trust publish failed: {0}")]
    Trust(#[from] TrustError),
}

/// A registry repository with content trust.
pub struct TrustedRepository {
    reference: Reference,
    registry_auth: RegistryCredentials,
    trust_auth: TrustCredentials,
    config: TrustConfig,
    registry: Box<dyn RegistryOperations>,
    trust: Box<dyn TrustOperations>,
}

impl TrustedRepository {
    /// Constructs a repository bound to `reference`, loading the trust
    /// configuration from `config_dir` and wiring the default
    /// collaborators. Performs no network I/O.
    pub fn new(
        config_dir: impl AsRef<Path>,
        reference: Reference,
        registry_auth: RegistryCredentials,
        trust_auth: TrustCredentials,
    ) -> Result<Self, ConfigError> {
        let config = TrustConfig::parse(config_dir).map_err(|e| {
            error!("failed to parse config: {e}");
            e
        })?;
        let registry = OciRegistryClient::new(ClientConfig::default())
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        let trust = NotaryClient::new(&config)?;

        Ok(TrustedRepository {
            reference,
            registry_auth,
            trust_auth,
            config,
            registry: Box::new(registry),
            trust: Box::new(trust),
        })
    }

    /// Constructs a repository with caller-provided collaborators.
    /// The seam used by tests and by callers with custom transports.
    pub fn with_collaborators(
        config: TrustConfig,
        reference: Reference,
        registry_auth: RegistryCredentials,
        trust_auth: TrustCredentials,
        registry: Box<dyn RegistryOperations>,
        trust: Box<dyn TrustOperations>,
    ) -> Self {
        TrustedRepository {
            reference,
            registry_auth,
            trust_auth,
            config,
            registry,
            trust,
        }
    }

    pub fn reference(&self) -> &Reference {
        &self.reference
    }

    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    fn tag(&self) -> &str {
        self.reference.tag().unwrap_or(DEFAULT_TAG)
    }

    /// The trust record for `image` under this repository's tag.
    fn target_for(&self, image: &ImageArtifact) -> TrustResult<Target> {
        Ok(Target {
            name: self.tag().to_string(),
            digest: image.digest().map_err(TrustError::from)?,
            length: image.size().map_err(TrustError::from)?,
        })
    }

    /// All targets currently signed for this repository.
    pub async fn list_targets(&self) -> TrustResult<Vec<Target>> {
        self.trust
            .list_targets(&self.reference, &self.trust_auth)
            .await
            .map_err(|e| {
                error!("failed to list targets: {e}");
                e
            })
    }

    /// Pushes the image to the registry, then publishes its trust record.
    ///
    /// Trust publishing only runs after the registry push fully succeeds.
    /// When it fails anyway the registry push is not rolled back; the
    /// caller sees [`PushError::Trust`] and the image stays unsigned.
    pub async fn push(&self, image: &ImageArtifact) -> Result<(), PushError> {
        self.registry
            .push(&self.reference, image, &self.registry_auth)
            .await
            .map_err(|e| {
                error!("failed to push image: {e}");
                e
            })?;

        let target = self.target_for(image)?;
        self.trust
            .publish(&self.reference, &target, &self.trust_auth)
            .await
            .map_err(|e| {
                error!("failed to publish trusted reference: {e}");
                PushError::Trust(e)
            })
    }

    /// The manifest digest and size the registry currently serves for
    /// this reference. Callers compare this against [`Self::verify`] to
    /// detect a registry/trust mismatch.
    pub async fn resolve_digest(&self) -> Result<(String, u64), RegistryError> {
        self.registry
            .manifest_digest(&self.reference, &self.registry_auth)
            .await
            .map_err(|e| {
                error!("failed to resolve manifest digest: {e}");
                e
            })
    }

    /// The valid signed target bound to this repository's tag.
    pub async fn verify(&self) -> TrustResult<Target> {
        self.trust
            .trusted_target(&self.reference, &self.trust_auth)
            .await
            .map_err(|e| {
                error!("failed to verify repository: {e}");
                e
            })
    }

    /// Signs the image under this repository's tag without pushing it.
    pub async fn sign(&self, image: &ImageArtifact) -> TrustResult<()> {
        let target = self.target_for(image)?;
        self.trust
            .sign(&self.reference, &target, &self.trust_auth)
            .await
            .map_err(|e| {
                error!("failed to sign image: {e}");
                e
            })
    }

    /// Removes the trust record for `tag` and re-signs the remainder.
    pub async fn revoke(&self, tag: &str) -> TrustResult<()> {
        self.trust
            .revoke(&self.reference, tag, &self.trust_auth)
            .await
            .map_err(|e| {
                error!("failed to revoke trusted tag: {e}");
                e
            })
    }
}
