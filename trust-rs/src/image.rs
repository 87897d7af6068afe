// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! An image artifact ready to be pushed and signed.
//!
//! The trust record for an image is derived from its manifest: the target
//! digest is the sha256 of the canonical manifest bytes and the target
//! length is the manifest byte length, matching what registries report
//! for the manifest blob.

use oci_client::{
    client::{Config, ImageLayer},
    manifest::OciImageManifest,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DIGEST_SHA256_PREFIX: &str = "sha256:";

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to serialize image manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// A pushable OCI image: manifest, config blob and layer blobs.
#[derive(Clone)]
pub struct ImageArtifact {
    pub manifest: OciImageManifest,
    pub config: Config,
    pub layers: Vec<ImageLayer>,
}

impl ImageArtifact {
    pub fn new(manifest: OciImageManifest, config: Config, layers: Vec<ImageLayer>) -> Self {
        ImageArtifact {
            manifest,
            config,
            layers,
        }
    }

    /// Builds an artifact from raw config and layer blobs, deriving the
    /// manifest from their digests.
    pub fn from_parts(config: Config, layers: Vec<ImageLayer>) -> Self {
        let manifest = OciImageManifest::build(&layers, &config, None);
        ImageArtifact {
            manifest,
            config,
            layers,
        }
    }

    fn manifest_bytes(&self) -> Result<Vec<u8>, ImageError> {
        Ok(serde_json::to_vec(&self.manifest)?)
    }

    /// `sha256:<hex>` digest of the canonical manifest bytes.
    pub fn digest(&self) -> Result<String, ImageError> {
        let bytes = self.manifest_bytes()?;
        let digest = Sha256::digest(&bytes);
        Ok(format!("{DIGEST_SHA256_PREFIX}{digest:x}"))
    }

    /// Byte length of the canonical manifest.
    pub fn size(&self) -> Result<u64, ImageError> {
        Ok(self.manifest_bytes()?.len() as u64)
    }
}
