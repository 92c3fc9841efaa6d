//! RSA PKCS#1 v1.5 envelope encryption of the already-compressed batch.
//!
//! The agent holds the public half (SPKI PEM), the server the private half
//! (PKCS#1 or PKCS#8 PEM). Payloads longer than one modulus are split into
//! `size − 11` byte blocks; ciphertext blocks are concatenated, so
//! `decrypt(encrypt(x)) = x` for any length.

use std::fs;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::CodecError;

// PKCS#1 v1.5 padding overhead per block.
const PADDING_LEN: usize = 11;

fn key_error(path: &Path, reason: impl ToString) -> CodecError {
    CodecError::KeyMaterial {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

/// The agent-side public key.
#[derive(Clone, Debug)]
pub struct EncryptKey {
    key: RsaPublicKey,
}

impl From<RsaPublicKey> for EncryptKey {
    fn from(key: RsaPublicKey) -> Self {
        Self { key }
    }
}

impl EncryptKey {
    /// Load an SPKI ("PUBLIC KEY") PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| key_error(path, e))?;
        let key = RsaPublicKey::from_public_key_pem(&pem).map_err(|e| key_error(path, e))?;
        Ok(Self { key })
    }

    /// Encrypt `data`, chunking at the PKCS#1 v1.5 block limit.
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut rng = rand::rngs::OsRng;
        let block = self.key.size() - PADDING_LEN;
        let mut out = Vec::with_capacity(data.len() + self.key.size());
        for chunk in data.chunks(block) {
            out.extend(self.key.encrypt(&mut rng, Pkcs1v15Encrypt, chunk)?);
        }
        Ok(out)
    }
}

/// The server-side private key.
pub struct DecryptKey {
    key: RsaPrivateKey,
}

impl std::fmt::Debug for DecryptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptKey").finish_non_exhaustive()
    }
}

impl From<RsaPrivateKey> for DecryptKey {
    fn from(key: RsaPrivateKey) -> Self {
        Self { key }
    }
}

impl DecryptKey {
    /// Load an RSA private key from a PKCS#1 ("RSA PRIVATE KEY") or PKCS#8
    /// ("PRIVATE KEY") PEM file.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, CodecError> {
        let path = path.as_ref();
        let pem = fs::read_to_string(path).map_err(|e| key_error(path, e))?;
        let key = RsaPrivateKey::from_pkcs1_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
            .map_err(|e| key_error(path, e))?;
        Ok(Self { key })
    }

    /// Decrypt a concatenation of PKCS#1 v1.5 blocks.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let block = self.key.size();
        if data.len() % block != 0 {
            return Err(CodecError::Envelope(rsa::Error::Decryption));
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            out.extend(self.key.decrypt(Pkcs1v15Encrypt, chunk)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use std::io::Write;

    use super::*;

    fn key_pair() -> (EncryptKey, DecryptKey) {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&key);
        (EncryptKey { key: public }, DecryptKey { key })
    }

    #[test]
    fn round_trip_short() {
        let (public, private) = key_pair();
        let body = br#"[{"id":"Alloc","type":"gauge","value":1.5}]"#;
        let sealed = public.encrypt(body).unwrap();
        assert_ne!(sealed.as_slice(), body.as_slice());
        assert_eq!(private.decrypt(&sealed).unwrap(), body);
    }

    #[test]
    fn round_trip_spans_multiple_blocks() {
        let (public, private) = key_pair();
        let body = vec![0x5au8; 4096];
        let sealed = public.encrypt(&body).unwrap();
        assert_eq!(private.decrypt(&sealed).unwrap(), body);
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let (public, private) = key_pair();
        let sealed = public.encrypt(b"payload").unwrap();
        assert!(private.decrypt(&sealed[..sealed.len() - 1]).is_err());
    }

    #[test]
    fn plain_body_is_rejected() {
        let (_, private) = key_pair();
        assert!(private.decrypt(b"not ciphertext").is_err());
    }

    #[test]
    fn pem_files_load() {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 1024).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let private_path = dir.path().join("private.pem");
        let mut f = std::fs::File::create(&private_path).unwrap();
        f.write_all(key.to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes())
            .unwrap();

        let public_path = dir.path().join("public.pem");
        let pem = RsaPublicKey::from(&key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        std::fs::write(&public_path, pem).unwrap();

        let public = EncryptKey::from_pem_file(&public_path).unwrap();
        let private = DecryptKey::from_pem_file(&private_path).unwrap();
        let sealed = public.encrypt(b"body").unwrap();
        assert_eq!(private.decrypt(&sealed).unwrap(), b"body");
    }
}
