// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! `trust-rs` binds an OCI registry to a content-trust (Notary style)
//! service, so that callers can push container images together with
//! signed trust metadata and verify or revoke that metadata later.

/// The tag assumed when an image reference carries neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

pub mod auth;
pub mod config;
pub mod image;
pub mod passphrase;
pub mod registry;
pub mod repository;
pub mod trust;

pub use auth::{RegistryCredentials, TrustCredentials};
pub use config::{ConfigError, TrustConfig};
pub use image::ImageArtifact;
pub use registry::{OciRegistryClient, RegistryError, RegistryOperations};
pub use repository::{PushError, TrustedRepository};
pub use trust::{notary::NotaryClient, Target, TrustError, TrustOperations};
