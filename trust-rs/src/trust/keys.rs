// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Targets-role signing keys.
//!
//! Keys are ECDSA P-256. At rest they live under `<trust_dir>/private/`,
//! one JSON envelope per repository, with the PKCS#8 key bytes encrypted
//! by AES-256-GCM under the SHA-256 of a passphrase obtained from the
//! configured [`PassphraseRetriever`].

use std::path::{Path, PathBuf};

use aes_gcm::{aead::Aead, Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use p256::{
    ecdsa::{signature::Signer, Signature, SigningKey},
    pkcs8::{DecodePrivateKey, EncodePrivateKey},
    SecretKey,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::passphrase::{KeyRequest, PassphraseRetriever};

/// Subdirectory of the trust cache holding private key envelopes.
pub const PRIVATE_KEY_SUBDIR: &str = "private";

/// Role alias passed to the passphrase retriever.
pub const TARGETS_ALIAS: &str = "targets";

const NONCE_LEN: usize = 12;

pub type KeyStoreResult<T> = std::result::Result<T, KeyStoreError>;

#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("key store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("passphrase retrieval failed: {0}")]
    Passphrase(#[from] crate::passphrase::PassphraseError),

    #[error("invalid passphrase for key `{0}`")]
    BadPassphrase(String),

    #[error("malformed key file for `{0}`: {1}")]
    Malformed(String, String),

    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

/// An unlocked targets-role signing key.
pub struct TargetsKey {
    secret: SecretKey,
    signing: SigningKey,
    key_id: String,
}

impl TargetsKey {
    /// Generates a fresh key. Persisting it is the [`KeyStore`]'s job.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        Self::from_secret(secret)
    }

    fn from_secret(secret: SecretKey) -> Self {
        let signing = SigningKey::from(&secret);
        let key_id = Self::key_id_for(&secret.public_key().to_sec1_bytes());
        TargetsKey {
            secret,
            signing,
            key_id,
        }
    }

    /// Key identifier for a SEC1-encoded public key.
    pub fn key_id_for(sec1_public_key: &[u8]) -> String {
        hex::encode(Sha256::digest(sec1_public_key))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// SEC1 public key, base64-encoded. This is the value that gets
    /// pinned in the local trust cache.
    pub fn public_key_b64(&self) -> String {
        STANDARD.encode(self.secret.public_key().to_sec1_bytes())
    }

    /// DER-encoded ECDSA signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign(message);
        signature.to_der().as_bytes().to_vec()
    }
}

/// Encrypted on-disk form of one key.
#[derive(serde::Serialize, serde::Deserialize)]
struct KeyEnvelope {
    role: String,
    key_name: String,
    key_id: String,
    nonce: String,
    ciphertext: String,
}

fn passphrase_key(passphrase: &str) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(Sha256::digest(passphrase.as_bytes()).into())
}

/// Store of passphrase-protected targets keys, one per repository.
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    pub fn new(trust_dir: &Path) -> Self {
        KeyStore {
            root: trust_dir.join(PRIVATE_KEY_SUBDIR),
        }
    }

    fn key_path(&self, key_name: &str) -> PathBuf {
        let file: String = key_name
            .chars()
            .map(|c| if c == '/' || c == ':' { '_' } else { c })
            .collect();
        self.root.join(format!("{file}.key"))
    }

    /// Unlocks the key for `key_name`, generating and persisting a new
    /// one when none exists yet. The retriever is told whether the key is
    /// new via [`KeyRequest::is_new`].
    pub fn load_or_create(
        &self,
        key_name: &str,
        retriever: &dyn PassphraseRetriever,
    ) -> KeyStoreResult<TargetsKey> {
        let path = self.key_path(key_name);
        if path.exists() {
            self.load(key_name, &path, retriever)
        } else {
            self.create(key_name, &path, retriever)
        }
    }

    fn load(
        &self,
        key_name: &str,
        path: &Path,
        retriever: &dyn PassphraseRetriever,
    ) -> KeyStoreResult<TargetsKey> {
        let raw = std::fs::read(path)?;
        let envelope: KeyEnvelope = serde_json::from_slice(&raw)
            .map_err(|e| KeyStoreError::Malformed(key_name.to_string(), e.to_string()))?;

        let passphrase = retriever.passphrase(&KeyRequest {
            key_name,
            alias: TARGETS_ALIAS,
            is_new: false,
        })?;
        let kek = passphrase_key(&passphrase);

        let nonce = STANDARD
            .decode(&envelope.nonce)
            .map_err(|e| KeyStoreError::Malformed(key_name.to_string(), e.to_string()))?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| KeyStoreError::Malformed(key_name.to_string(), e.to_string()))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
        let pkcs8 = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| KeyStoreError::BadPassphrase(key_name.to_string()))?,
        );

        let secret = SecretKey::from_pkcs8_der(&pkcs8)
            .map_err(|e| KeyStoreError::Malformed(key_name.to_string(), e.to_string()))?;
        let key = TargetsKey::from_secret(secret);
        if key.key_id() != envelope.key_id {
            return Err(KeyStoreError::Malformed(
                key_name.to_string(),
                "key id does not match key material".to_string(),
            ));
        }

        debug!("unlocked targets key {} for {key_name}", key.key_id());
        Ok(key)
    }

    fn create(
        &self,
        key_name: &str,
        path: &Path,
        retriever: &dyn PassphraseRetriever,
    ) -> KeyStoreResult<TargetsKey> {
        let key = TargetsKey::generate();
        let passphrase = retriever.passphrase(&KeyRequest {
            key_name,
            alias: TARGETS_ALIAS,
            is_new: true,
        })?;
        let kek = passphrase_key(&passphrase);

        let pkcs8 = key
            .secret
            .to_pkcs8_der()
            .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(kek.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), pkcs8.as_bytes())
            .map_err(|e| KeyStoreError::Crypto(format!("aes-256-gcm encrypt failed: {e:?}")))?;

        let envelope = KeyEnvelope {
            role: TARGETS_ALIAS.to_string(),
            key_name: key_name.to_string(),
            key_id: key.key_id().to_string(),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };

        std::fs::create_dir_all(&self.root)?;
        let raw = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
        std::fs::write(path, raw)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("generated targets key {} for {key_name}", key.key_id());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passphrase::{DecliningRetriever, PassphraseResult, StaticRetriever};
    use std::sync::Mutex;

    const GUN: &str = "registry.example.com/team/app";

    #[test]
    fn create_then_load_round_trip() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tempdir.path());
        let retriever = StaticRetriever::new("hunter2");

        let created = store.load_or_create(GUN, &retriever).unwrap();
        let loaded = store.load_or_create(GUN, &retriever).unwrap();
        assert_eq!(created.key_id(), loaded.key_id());
        assert_eq!(created.public_key_b64(), loaded.public_key_b64());
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tempdir.path());
        store
            .load_or_create(GUN, &StaticRetriever::new("hunter2"))
            .unwrap();

        let result = store.load_or_create(GUN, &StaticRetriever::new("wrong"));
        assert!(matches!(result, Err(KeyStoreError::BadPassphrase(_))));
    }

    #[test]
    fn declined_passphrase_surfaces() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tempdir.path());
        let result = store.load_or_create(GUN, &DecliningRetriever);
        assert!(matches!(result, Err(KeyStoreError::Passphrase(_))));
    }

    #[test]
    fn retriever_sees_is_new_flag() {
        struct Recorder(Mutex<Vec<bool>>);
        impl PassphraseRetriever for Recorder {
            fn passphrase(&self, request: &KeyRequest<'_>) -> PassphraseResult {
                self.0.lock().unwrap().push(request.is_new);
                Ok(zeroize::Zeroizing::new("pw".to_string()))
            }
        }

        let tempdir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tempdir.path());
        let recorder = Recorder(Mutex::new(Vec::new()));
        store.load_or_create(GUN, &recorder).unwrap();
        store.load_or_create(GUN, &recorder).unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn distinct_repositories_get_distinct_keys() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(tempdir.path());
        let retriever = StaticRetriever::new("hunter2");

        let one = store.load_or_create(GUN, &retriever).unwrap();
        let two = store
            .load_or_create("registry.example.com/team/other", &retriever)
            .unwrap();
        assert_ne!(one.key_id(), two.key_id());
    }

    #[test]
    fn signatures_verify_with_public_key() {
        use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

        let key = TargetsKey::generate();
        let message = b"signed bytes";
        let der = key.sign(message);

        let pub_key = STANDARD.decode(key.public_key_b64()).unwrap();
        let verifying = VerifyingKey::from_sec1_bytes(&pub_key).unwrap();
        let signature = Signature::from_der(&der).unwrap();
        verifying.verify(message, &signature).unwrap();
    }
}
