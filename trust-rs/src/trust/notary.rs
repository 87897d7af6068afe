// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Notary-style trust service client.
//!
//! Talks to a server exposing TUF metadata under
//! `/v2/<gun>/_trust/tuf/targets.json` and keeps a local copy of the last
//! good document under `<trust_dir>/tuf/<gun>/metadata/`. The signing key
//! of a repository is pinned on first use; later documents must be signed
//! by the pinned key. Bootstrapping from an offline root role is the
//! excluded TUF engine's job, not this client's.

use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, warn};
use oci_client::Reference;
use reqwest::StatusCode;
use url::Url;

use crate::auth::TrustCredentials;
use crate::config::{ConfigError, TrustConfig};
use crate::passphrase::PassphraseRetriever;
use crate::trust::keys::{KeyStore, TargetsKey};
use crate::trust::metadata::{MetadataError, SignedTargets};
use crate::trust::{Target, TrustError, TrustOperations, TrustResult};
use crate::DEFAULT_TAG;

/// Subdirectory of the trust cache holding per-repository metadata.
pub const TUF_CACHE_SUBDIR: &str = "tuf";

const TARGETS_FILE: &str = "targets.json";
const PINNED_KEY_FILE: &str = "targets.pub";

/// Trust-service collaborator over HTTP with a local metadata cache.
pub struct NotaryClient {
    http: reqwest::Client,
    server: Url,
    trust_dir: PathBuf,
    key_store: KeyStore,
    retriever: Box<dyn PassphraseRetriever>,
}

impl NotaryClient {
    /// Builds a client from the trust configuration. Reads the optional
    /// root CA bundle but performs no network I/O.
    pub fn new(config: &TrustConfig) -> Result<Self, ConfigError> {
        let retriever = config.passphrase.retriever();
        Self::with_retriever(config, retriever)
    }

    /// Like [`NotaryClient::new`] with a caller-provided passphrase
    /// retriever, overriding the configured source.
    pub fn with_retriever(
        config: &TrustConfig,
        retriever: Box<dyn PassphraseRetriever>,
    ) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(path) = &config.root_ca {
            let pem = std::fs::read(path).map_err(|source| ConfigError::RootCa {
                path: path.clone(),
                source,
            })?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ConfigError::Client(e.to_string()))?;
            builder = builder.add_root_certificate(certificate);
        }
        let http = builder
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(NotaryClient {
            http,
            server: config.server.clone(),
            trust_dir: config.trust_dir.clone(),
            key_store: KeyStore::new(&config.trust_dir),
            retriever,
        })
    }

    /// Globally unique name of the repository, `registry/repository`.
    fn gun(reference: &Reference) -> String {
        format!("{}/{}", reference.registry(), reference.repository())
    }

    fn targets_url(&self, gun: &str) -> String {
        format!(
            "{}/v2/{gun}/_trust/tuf/{TARGETS_FILE}",
            self.server.as_str().trim_end_matches('/')
        )
    }

    fn metadata_dir(&self, gun: &str) -> PathBuf {
        let sanitized: String = gun
            .chars()
            .map(|c| if c == '/' || c == ':' { '_' } else { c })
            .collect();
        self.trust_dir
            .join(TUF_CACHE_SUBDIR)
            .join(sanitized)
            .join("metadata")
    }

    async fn fetch_remote(
        &self,
        gun: &str,
        auth: &TrustCredentials,
    ) -> TrustResult<SignedTargets> {
        let url = self.targets_url(gun);
        debug!("fetching trust metadata from {url}");
        let response = auth
            .apply(self.http.get(&url))
            .send()
            .await
            .map_err(|e| TrustError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TrustError::NoTrustData),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TrustError::Unavailable(e.to_string()))?;
                let document: SignedTargets =
                    serde_json::from_slice(&body).map_err(MetadataError::from)?;
                Ok(document)
            }
            status => Err(TrustError::Unavailable(format!(
                "trust server returned {status} for {url}"
            ))),
        }
    }

    async fn pinned_key(&self, gun: &str) -> TrustResult<Option<String>> {
        let path = self.metadata_dir(gun).join(PINNED_KEY_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(pin) => Ok(Some(pin.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::Cache(e)),
        }
    }

    /// Verifies a fetched document against the pinned signing key,
    /// pinning the key on first contact with a repository.
    async fn verify_fetched(&self, gun: &str, document: &SignedTargets) -> TrustResult<()> {
        match self.pinned_key(gun).await? {
            Some(pin) => {
                document.verify(Some(&pin), chrono::Utc::now())?;
            }
            None => {
                document.verify(None, chrono::Utc::now())?;
                // First contact: pin the signing key for future fetches.
                if let Some(signature) = document.signatures.first() {
                    self.write_pin(gun, &signature.pub_key).await?;
                }
            }
        }
        Ok(())
    }

    async fn write_pin(&self, gun: &str, pub_key: &str) -> TrustResult<()> {
        let dir = self.metadata_dir(gun);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(PINNED_KEY_FILE), pub_key).await?;
        Ok(())
    }

    async fn cached_document(&self, gun: &str) -> TrustResult<Option<SignedTargets>> {
        let path = self.metadata_dir(gun).join(TARGETS_FILE);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let document: SignedTargets =
                    serde_json::from_slice(&raw).map_err(MetadataError::from)?;
                Ok(Some(document))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TrustError::Cache(e)),
        }
    }

    async fn store_document(&self, gun: &str, document: &SignedTargets) -> TrustResult<()> {
        let dir = self.metadata_dir(gun);
        tokio::fs::create_dir_all(&dir).await?;
        let raw = serde_json::to_vec_pretty(document).map_err(MetadataError::from)?;
        tokio::fs::write(dir.join(TARGETS_FILE), raw).await?;
        if let Some(signature) = document.signatures.first() {
            self.write_pin(gun, &signature.pub_key).await?;
        }
        Ok(())
    }

    /// The current document as a base for mutation: the cached copy when
    /// one exists, otherwise the server copy, otherwise a fresh one.
    async fn document_for_update(
        &self,
        gun: &str,
        auth: &TrustCredentials,
    ) -> TrustResult<SignedTargets> {
        if let Some(document) = self.cached_document(gun).await? {
            return Ok(document);
        }
        match self.fetch_remote(gun, auth).await {
            Ok(document) => {
                // An expired document may still be refreshed by re-signing.
                match self.verify_fetched(gun, &document).await {
                    Ok(()) | Err(TrustError::Metadata(MetadataError::Expired(_))) => Ok(document),
                    Err(e) => Err(e),
                }
            }
            Err(TrustError::NoTrustData) => Ok(SignedTargets::empty()),
            Err(e) => Err(e),
        }
    }

    async fn publish_document(
        &self,
        gun: &str,
        document: &SignedTargets,
        auth: &TrustCredentials,
    ) -> TrustResult<()> {
        let url = self.targets_url(gun);
        debug!(
            "publishing trust metadata version {} to {url}",
            document.signed.version
        );
        let response = auth
            .apply(self.http.post(&url).json(document))
            .send()
            .await
            .map_err(|e| TrustError::Publish(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TrustError::Publish(format!(
                "trust server returned {} for {url}",
                response.status()
            )));
        }

        self.store_document(gun, document).await
    }

    /// A signing key that does not match the pinned key must not
    /// silently re-pin the repository; reject it before publishing.
    async fn check_pin(&self, gun: &str, key: &TargetsKey) -> TrustResult<()> {
        if let Some(pin) = self.pinned_key(gun).await? {
            if pin != key.public_key_b64() {
                warn!("key store key for {gun} does not match the pinned key");
                return Err(TrustError::Metadata(MetadataError::KeyMismatch));
            }
        }
        Ok(())
    }

    async fn publish_target(
        &self,
        reference: &Reference,
        target: &Target,
        auth: &TrustCredentials,
    ) -> TrustResult<()> {
        let gun = Self::gun(reference);
        let mut document = self.document_for_update(&gun, auth).await?;

        let changed = document.add_target(target)?;
        if !changed && !document.signatures.is_empty() {
            debug!("target {} already signed for {gun}, nothing to publish", target.name);
            return Ok(());
        }

        let key = self
            .key_store
            .load_or_create(&gun, self.retriever.as_ref())?;
        self.check_pin(&gun, &key).await?;
        document.sign(&key)?;
        self.publish_document(&gun, &document, auth).await
    }
}

#[async_trait]
impl TrustOperations for NotaryClient {
    async fn list_targets(
        &self,
        reference: &Reference,
        auth: &TrustCredentials,
    ) -> TrustResult<Vec<Target>> {
        let gun = Self::gun(reference);
        let document = match self.fetch_remote(&gun, auth).await {
            Ok(document) => document,
            Err(TrustError::Metadata(e)) => {
                warn!("trust metadata for {gun} is malformed: {e}");
                return Err(TrustError::NoTrustData);
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.verify_fetched(&gun, &document).await {
            match e {
                TrustError::Unavailable(_) | TrustError::Cache(_) => return Err(e),
                other => {
                    warn!("trust metadata for {gun} failed verification: {other}");
                    return Err(TrustError::NoTrustData);
                }
            }
        }
        match document.targets() {
            Ok(targets) => Ok(targets),
            Err(e) => {
                warn!("trust metadata for {gun} has malformed entries: {e}");
                Err(TrustError::NoTrustData)
            }
        }
    }

    async fn publish(
        &self,
        reference: &Reference,
        target: &Target,
        auth: &TrustCredentials,
    ) -> TrustResult<()> {
        self.publish_target(reference, target, auth).await
    }

    async fn trusted_target(
        &self,
        reference: &Reference,
        auth: &TrustCredentials,
    ) -> TrustResult<Target> {
        let gun = Self::gun(reference);
        let tag = reference.tag().unwrap_or(DEFAULT_TAG);

        let document = match self.fetch_remote(&gun, auth).await {
            Ok(document) => document,
            Err(TrustError::NoTrustData) => return Err(TrustError::NotTrusted),
            Err(TrustError::Metadata(e)) => {
                warn!("trust metadata for {gun} is malformed: {e}");
                return Err(TrustError::NotTrusted);
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = self.verify_fetched(&gun, &document).await {
            match e {
                // Transport and cache failures are not verdicts on trust.
                TrustError::Unavailable(_) | TrustError::Cache(_) => return Err(e),
                other => {
                    warn!("trust metadata for {gun} failed verification: {other}");
                    return Err(TrustError::NotTrusted);
                }
            }
        }

        match document.target(tag) {
            Ok(Some(target)) => Ok(target),
            Ok(None) => Err(TrustError::NotTrusted),
            Err(e) => {
                warn!("trust metadata for {gun} has a malformed entry for {tag}: {e}");
                Err(TrustError::NotTrusted)
            }
        }
    }

    async fn sign(
        &self,
        reference: &Reference,
        target: &Target,
        auth: &TrustCredentials,
    ) -> TrustResult<()> {
        self.publish_target(reference, target, auth).await
    }

    async fn revoke(
        &self,
        reference: &Reference,
        tag: &str,
        auth: &TrustCredentials,
    ) -> TrustResult<()> {
        let gun = Self::gun(reference);
        let mut document = match self.cached_document(&gun).await? {
            Some(document) => document,
            None => match self.fetch_remote(&gun, auth).await {
                Ok(document) => {
                    self.verify_fetched(&gun, &document).await?;
                    document
                }
                Err(TrustError::NoTrustData) => return Err(TrustError::NotTrusted),
                Err(e) => return Err(e),
            },
        };

        if !document.remove_target(tag) {
            return Err(TrustError::NotTrusted);
        }

        let key = self
            .key_store
            .load_or_create(&gun, self.retriever.as_ref())?;
        self.check_pin(&gun, &key).await?;
        document.sign(&key)?;
        self.publish_document(&gun, &document, auth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::keys::TargetsKey;
    use std::str::FromStr;

    fn client(trust_dir: &std::path::Path) -> NotaryClient {
        client_at("https://notary.example.com", trust_dir)
    }

    fn client_at(server: &str, trust_dir: &std::path::Path) -> NotaryClient {
        let config = TrustConfig::new(Url::parse(server).unwrap(), trust_dir.to_path_buf());
        NotaryClient::new(&config).unwrap()
    }

    /// One-shot HTTP listener answering the next request with the given
    /// status line and body. Returns the server's base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn gun_is_registry_and_repository() {
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();
        assert_eq!(
            NotaryClient::gun(&reference),
            "registry.example.com/team/app"
        );
    }

    #[test]
    fn targets_url_has_tuf_layout() {
        let tempdir = tempfile::tempdir().unwrap();
        let client = client(tempdir.path());
        assert_eq!(
            client.targets_url("registry.example.com/team/app"),
            "https://notary.example.com/v2/registry.example.com/team/app/_trust/tuf/targets.json"
        );
    }

    #[test]
    fn metadata_dir_is_sanitized() {
        let tempdir = tempfile::tempdir().unwrap();
        let client = client(tempdir.path());
        let dir = client.metadata_dir("registry.example.com:5000/team/app");
        assert_eq!(
            dir,
            tempdir
                .path()
                .join(TUF_CACHE_SUBDIR)
                .join("registry.example.com_5000_team_app")
                .join("metadata")
        );
    }

    #[tokio::test]
    async fn cache_round_trip_and_pinning() {
        let tempdir = tempfile::tempdir().unwrap();
        let client = client(tempdir.path());
        let gun = "registry.example.com/team/app";

        let key = TargetsKey::generate();
        let mut document = SignedTargets::empty();
        document
            .add_target(&Target {
                name: "v1".to_string(),
                digest: format!("sha256:{}", "aa".repeat(32)),
                length: 1024,
            })
            .unwrap();
        document.sign(&key).unwrap();

        assert!(client.cached_document(gun).await.unwrap().is_none());
        client.store_document(gun, &document).await.unwrap();

        let cached = client.cached_document(gun).await.unwrap().unwrap();
        assert_eq!(cached, document);
        assert_eq!(
            client.pinned_key(gun).await.unwrap(),
            Some(key.public_key_b64())
        );

        // A document signed by a different key must fail the pin check.
        let other_key = TargetsKey::generate();
        let mut forged = SignedTargets::empty();
        forged.sign(&other_key).unwrap();
        let result = client.verify_fetched(gun, &forged).await;
        assert!(matches!(
            result,
            Err(TrustError::Metadata(MetadataError::KeyMismatch))
        ));
    }

    #[tokio::test]
    async fn missing_remote_metadata_is_no_trust_data() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = serve_once("404 Not Found", "").await;
        let client = client_at(&server, tempdir.path());
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();

        let result = client
            .list_targets(&reference, &TrustCredentials::Anonymous)
            .await;
        assert!(matches!(result, Err(TrustError::NoTrustData)));
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = serve_once("500 Internal Server Error", "").await;
        let client = client_at(&server, tempdir.path());
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();

        let result = client
            .list_targets(&reference, &TrustCredentials::Anonymous)
            .await;
        assert!(matches!(result, Err(TrustError::Unavailable(_))));
    }

    #[tokio::test]
    async fn malformed_remote_metadata_is_not_trusted() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = serve_once("200 OK", "this is not json").await;
        let client = client_at(&server, tempdir.path());
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();

        let result = client
            .trusted_target(&reference, &TrustCredentials::Anonymous)
            .await;
        assert!(matches!(result, Err(TrustError::NotTrusted)));
    }

    #[tokio::test]
    async fn malformed_remote_metadata_lists_as_no_trust_data() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = serve_once("200 OK", "this is not json").await;
        let client = client_at(&server, tempdir.path());
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();

        let result = client
            .list_targets(&reference, &TrustCredentials::Anonymous)
            .await;
        assert!(matches!(result, Err(TrustError::NoTrustData)));
    }

    #[tokio::test]
    async fn failed_publish_is_a_publish_error() {
        let tempdir = tempfile::tempdir().unwrap();
        let server = serve_once("500 Internal Server Error", "").await;
        let client = client_at(&server, tempdir.path());

        let mut document = SignedTargets::empty();
        document.sign(&TargetsKey::generate()).unwrap();

        let result = client
            .publish_document(
                "registry.example.com/team/app",
                &document,
                &TrustCredentials::Anonymous,
            )
            .await;
        assert!(matches!(result, Err(TrustError::Publish(_))));
    }

    #[tokio::test]
    async fn publish_with_unpinned_key_is_rejected() {
        use crate::passphrase::StaticRetriever;

        let tempdir = tempfile::tempdir().unwrap();
        let config = TrustConfig::new(
            Url::parse("https://notary.example.com").unwrap(),
            tempdir.path().to_path_buf(),
        );
        let client =
            NotaryClient::with_retriever(&config, Box::new(StaticRetriever::new("pw"))).unwrap();
        let gun = "registry.example.com/team/app";
        let reference = Reference::from_str("registry.example.com/team/app:v1").unwrap();

        // Pin a key the key store does not hold.
        let pinned = TargetsKey::generate();
        let mut document = SignedTargets::empty();
        document.sign(&pinned).unwrap();
        client.store_document(gun, &document).await.unwrap();

        let target = Target {
            name: "v1".to_string(),
            digest: format!("sha256:{}", "aa".repeat(32)),
            length: 1024,
        };
        let result = client
            .publish(&reference, &target, &TrustCredentials::Anonymous)
            .await;
        assert!(matches!(
            result,
            Err(TrustError::Metadata(MetadataError::KeyMismatch))
        ));
    }

    #[tokio::test]
    async fn first_fetch_pins_signing_key() {
        let tempdir = tempfile::tempdir().unwrap();
        let client = client(tempdir.path());
        let gun = "registry.example.com/team/app";

        let key = TargetsKey::generate();
        let mut document = SignedTargets::empty();
        document.sign(&key).unwrap();

        client.verify_fetched(gun, &document).await.unwrap();
        assert_eq!(
            client.pinned_key(gun).await.unwrap(),
            Some(key.public_key_b64())
        );
    }
}
