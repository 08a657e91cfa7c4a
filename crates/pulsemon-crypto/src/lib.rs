//! RSA-OAEP-SHA256 sealing of opaque payloads.
//!
//! The agent encrypts a serialized request body with the collector's public
//! key; the collector decrypts it before JSON parsing. Plaintext is split
//! into chunks of `modulus_len - 2 * hash_len - 2` bytes and each chunk is
//! encrypted into one modulus-sized block. The ciphertext is the plain
//! concatenation of those blocks: no length prefix is carried, the
//! decryptor infers block boundaries from the modulus size.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

/// SHA-256 digest length, which fixes the OAEP overhead per block.
const HASH_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("cannot read key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("cannot parse key: {0}")]
    KeyParse(String),

    #[error("encryption failed: {0}")]
    Encrypt(rsa::Error),

    /// Any chunk failing to open fails the whole payload.
    #[error("decryption failed: {0}")]
    Decrypt(rsa::Error),
}

/// Agent-side payload encryptor holding the collector's public key.
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    pub fn from_pem_file(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Accepts an SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC
    /// KEY`) encoded key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| <RsaPublicKey as DecodeRsaPublicKey>::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
        Ok(Self { key })
    }

    /// Maximum plaintext bytes per OAEP block for this key.
    fn chunk_len(&self) -> usize {
        self.key.size() - 2 * HASH_LEN - 2
    }

    pub fn encrypt(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(msg.len() + self.key.size());
        for chunk in msg.chunks(self.chunk_len()) {
            let block = self
                .key
                .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
                .map_err(CryptoError::Encrypt)?;
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}

/// Collector-side payload decryptor holding the private key.
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    pub fn from_pem_file(path: &Path) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pem(&pem)
    }

    /// Accepts a PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8 (`BEGIN
    /// PRIVATE KEY`) encoded key.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .map_err(|e| CryptoError::KeyParse(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn decrypt(&self, msg: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let step = self.key.size();
        let mut out = Vec::with_capacity(msg.len());
        for block in msg.chunks(step) {
            let plain = self
                .key
                .decrypt(Oaep::new::<Sha256>(), block)
                .map_err(CryptoError::Decrypt)?;
            out.extend_from_slice(&plain);
        }
        Ok(out)
    }
}
