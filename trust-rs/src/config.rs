// Copyright (c) 2025 The trust-rs Authors
//
// SPDX-License-Identifier: Apache-2.0

//! Trust configuration loading.
//!
//! A configuration directory holds one `trust.toml` describing the trust
//! server, the local trust cache location and how signing-key passphrases
//! are obtained. The file is read once at adapter construction and the
//! resulting [`TrustConfig`] is immutable afterwards.

use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::passphrase::{EnvRetriever, PassphraseRetriever, StaticRetriever};

/// File name of the trust configuration inside the configuration directory.
pub const TRUST_CONFIG_FILE_NAME: &str = "trust.toml";

/// Directory (relative to the configuration directory) used as the default
/// local trust cache when `trust_dir` is not configured.
pub const DEFAULT_TRUST_SUBDIR: &str = "trust";

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("trust configuration directory `{0}` is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read trust configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse trust configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid trust server url `{url}`: {source}")]
    InvalidServer {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to load trust root CA `{path}`: {source}")]
    RootCa {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to construct client: {0}")]
    Client(String),
}

/// Where signing-key passphrases come from.
///
/// This is the serializable half of the passphrase strategy; it is turned
/// into a [`PassphraseRetriever`] on demand. Callers that need interactive
/// prompting inject their own retriever instead of configuring a source.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PassphraseSource {
    /// Read `<PREFIX>_<ALIAS>_PASSPHRASE` from the process environment.
    Env { prefix: String },

    /// A fixed passphrase taken from the configuration file itself.
    Static { passphrase: String },
}

impl Default for PassphraseSource {
    fn default() -> Self {
        PassphraseSource::Env {
            prefix: "NOTARY".to_string(),
        }
    }
}

impl PassphraseSource {
    /// Builds the retriever described by this source.
    pub fn retriever(&self) -> Box<dyn PassphraseRetriever> {
        match self {
            PassphraseSource::Env { prefix } => Box::new(EnvRetriever::new(prefix)),
            PassphraseSource::Static { passphrase } => Box::new(StaticRetriever::new(passphrase)),
        }
    }
}

/// On-disk shape of `trust.toml`.
#[derive(Deserialize)]
struct TrustConfigFile {
    server: String,

    #[serde(default)]
    trust_dir: Option<PathBuf>,

    #[serde(default)]
    root_ca: Option<PathBuf>,

    #[serde(default)]
    passphrase: Option<PassphraseSource>,
}

/// Immutable trust configuration bound to one adapter.
#[derive(Clone, Debug)]
pub struct TrustConfig {
    /// Base URL of the trust service.
    pub server: Url,

    /// Local trust metadata cache and private key store root.
    pub trust_dir: PathBuf,

    /// Optional PEM bundle to trust when talking to the trust service.
    pub root_ca: Option<PathBuf>,

    /// Passphrase retrieval strategy for signing keys.
    pub passphrase: PassphraseSource,
}

impl TrustConfig {
    /// Constructs a configuration directly, without a configuration
    /// directory. Mostly useful for tests and embedding callers.
    pub fn new(server: Url, trust_dir: PathBuf) -> Self {
        TrustConfig {
            server,
            trust_dir,
            root_ca: None,
            passphrase: PassphraseSource::default(),
        }
    }

    /// Loads `trust.toml` from `config_dir`.
    ///
    /// Performs no network I/O. Relative `trust_dir` and `root_ca` entries
    /// are resolved against `config_dir`.
    pub fn parse(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.is_dir() {
            return Err(ConfigError::NotADirectory(config_dir.to_path_buf()));
        }

        let config_path = config_dir.join(TRUST_CONFIG_FILE_NAME);
        let raw = std::fs::read_to_string(&config_path)?;
        let file: TrustConfigFile = toml::from_str(&raw)?;

        let server = Url::parse(&file.server).map_err(|source| ConfigError::InvalidServer {
            url: file.server.clone(),
            source,
        })?;

        let trust_dir = match file.trust_dir {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => config_dir.join(dir),
            None => config_dir.join(DEFAULT_TRUST_SUBDIR),
        };

        let root_ca = file.root_ca.map(|path| {
            if path.is_absolute() {
                path
            } else {
                config_dir.join(path)
            }
        });

        debug!(
            "loaded trust configuration: server {server}, trust dir {}",
            trust_dir.display()
        );

        Ok(TrustConfig {
            server,
            trust_dir,
            root_ca,
            passphrase: file.passphrase.unwrap_or_default(),
        })
    }
}
