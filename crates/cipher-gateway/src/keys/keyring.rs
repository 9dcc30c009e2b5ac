//! RSA keyring for legacy `x-enc-key` mode.
//!
//! The private key is read from the first existing, non-empty candidate path
//! on first use and kept for the life of the process. The public key is
//! handed to clients at handshake so they can wrap their own key/iv.

use crate::domain::error::{GatewayError, GatewayResult};
use parking_lot::RwLock;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct RsaKeyring {
    private_paths: Vec<PathBuf>,
    public_paths: Vec<PathBuf>,
    private_key: RwLock<Option<Arc<RsaPrivateKey>>>,
}

impl RsaKeyring {
    pub fn new(private_paths: Vec<PathBuf>, public_paths: Vec<PathBuf>) -> Self {
        Self {
            private_paths,
            public_paths,
            private_key: RwLock::new(None),
        }
    }

    /// Keyring preloaded with a key, for embedders and tests
    pub fn with_private_key(key: RsaPrivateKey) -> Self {
        Self {
            private_paths: Vec::new(),
            public_paths: Vec::new(),
            private_key: RwLock::new(Some(Arc::new(key))),
        }
    }

    /// PEM text of the first readable public key candidate
    pub fn public_key_pem(&self) -> Option<String> {
        first_existing(&self.public_paths).map(|(_, pem)| pem)
    }

    /// RSA-PKCS#1 v1.5 decrypt with the service private key.
    ///
    /// A missing or unparsable key is a server configuration error; a
    /// ciphertext that does not decrypt is a legacy key failure.
    pub fn decrypt(&self, ciphertext: &[u8]) -> GatewayResult<Vec<u8>> {
        let key = self.private_key()?;
        key.decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| GatewayError::LegacyKey(format!("rsa decrypt: {}", e)))
    }

    fn private_key(&self) -> GatewayResult<Arc<RsaPrivateKey>> {
        if let Some(key) = self.private_key.read().as_ref() {
            return Ok(key.clone());
        }

        let (path, pem) = first_existing(&self.private_paths).ok_or_else(|| {
            GatewayError::ServerConfig("no RSA private key found in candidate paths".into())
        })?;
        let key = parse_private_pem(&pem).map_err(|e| {
            warn!(path = %path.display(), error = %e, "RSA private key unreadable");
            GatewayError::ServerConfig(format!("{}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "RSA private key loaded");

        let key = Arc::new(key);
        *self.private_key.write() = Some(key.clone());
        Ok(key)
    }
}

/// File names written by [`generate_keypair`], matching the first default candidates
pub const PRIVATE_KEY_FILE: &str = "rsa_private_key.pem";
pub const PUBLIC_KEY_FILE: &str = "rsa_public_key.pem";

/// Result of [`generate_keypair`]
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    /// SPKI PEM for client SDKs
    pub public_pem: String,
}

/// Generate an RSA keypair and write both halves as PEM under `dir`.
///
/// The private key is PKCS#8, the public key SPKI. Existing files are
/// overwritten.
pub fn generate_keypair(dir: &Path, bits: usize) -> GatewayResult<GeneratedKeyPair> {
    let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        .map_err(|e| GatewayError::ServerConfig(format!("rsa keygen: {}", e)))?;
    let private_pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| GatewayError::ServerConfig(format!("private key pem: {}", e)))?;
    let public_pem = RsaPublicKey::from(&key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| GatewayError::ServerConfig(format!("public key pem: {}", e)))?;

    let write = |path: &Path, content: &str| {
        std::fs::write(path, content)
            .map_err(|e| GatewayError::ServerConfig(format!("{}: {}", path.display(), e)))
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| GatewayError::ServerConfig(format!("{}: {}", dir.display(), e)))?;
    let private_path = dir.join(PRIVATE_KEY_FILE);
    let public_path = dir.join(PUBLIC_KEY_FILE);
    write(&private_path, &private_pem)?;
    write(&public_path, &public_pem)?;

    info!(path = %private_path.display(), bits = bits, "RSA keypair written");
    Ok(GeneratedKeyPair {
        private_path,
        public_path,
        public_pem,
    })
}

fn parse_private_pem(pem: &str) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| e.to_string())
}

fn first_existing(paths: &[PathBuf]) -> Option<(&Path, String)> {
    paths.iter().find_map(|path| {
        std::fs::read_to_string(path)
            .ok()
            .filter(|content| !content.trim().is_empty())
            .map(|content| (path.as_path(), content))
    })
}
