use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use thiserror::Error;

const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("crypto failure")]
    Crypto,

    #[error("blob is not valid base64 or is truncated")]
    Malformed,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Exchange API credentials sealed by the `encrypt` one-shot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangeCredentials {
    pub public_key: String,
    pub private_key: String,
}

/// The AEAD key is derived from the public key, so possession of the public
/// key is what unlocks the stored private key.
fn derive_key(public_key: &str) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(b"tiller-credentials-v1");
    hasher.update(public_key.as_bytes());
    let digest = hasher.finalize();
    *Key::from_slice(&digest)
}

/// Seal the credential pair into a base64 blob: `nonce || ciphertext`.
pub fn seal(credentials: &ExchangeCredentials) -> Result<String, CredentialsError> {
    let cipher = ChaCha20Poly1305::new(&derive_key(&credentials.public_key));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

    let payload = serde_json::to_vec(credentials)?;
    let ciphertext = cipher
        .encrypt(&nonce, payload.as_slice())
        .map_err(|_| CredentialsError::Crypto)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(blob))
}

/// Open a blob produced by [`seal`], authenticating with the public key.
pub fn open(blob: &str, public_key: &str) -> Result<ExchangeCredentials, CredentialsError> {
    let bytes = BASE64.decode(blob).map_err(|_| CredentialsError::Malformed)?;
    if bytes.len() <= NONCE_LEN {
        return Err(CredentialsError::Malformed);
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(&derive_key(public_key));
    let payload = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CredentialsError::Crypto)?;

    Ok(serde_json::from_slice(&payload)?)
}

/// Write the sealed blob to `path` (the `encrypt` subcommand).
pub fn seal_to_file(
    path: &Path,
    public_key: &str,
    private_key: &str,
) -> Result<(), CredentialsError> {
    let blob = seal(&ExchangeCredentials {
        public_key: public_key.to_owned(),
        private_key: private_key.to_owned(),
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, blob)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> ExchangeCredentials {
        ExchangeCredentials {
            public_key: String::from("pk-live-123"),
            private_key: String::from("sk-live-very-secret"),
        }
    }

    #[test]
    fn test_seal_open_round_trip() {
        let sealed = seal(&credentials()).unwrap();

        let opened = open(&sealed, "pk-live-123").unwrap();

        assert_eq!(opened, credentials());
        // Ciphertext must not leak the secret in the clear
        assert!(!sealed.contains("very-secret"));
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let sealed = seal(&credentials()).unwrap();

        assert!(matches!(
            open(&sealed, "pk-other"),
            Err(CredentialsError::Crypto)
        ));
    }

    #[test]
    fn test_open_rejects_malformed_blob() {
        assert!(matches!(
            open("@@not-base64@@", "pk"),
            Err(CredentialsError::Malformed)
        ));
        assert!(matches!(open("AAAA", "pk"), Err(CredentialsError::Malformed)));
    }

    #[test]
    fn test_seal_to_file_writes_blob() {
        let path = std::env::temp_dir()
            .join(format!("tiller-creds-{}", std::process::id()))
            .join("keys.blob");

        seal_to_file(&path, "pk-live-123", "sk-live-very-secret").unwrap();

        let blob = std::fs::read_to_string(&path).unwrap();
        let opened = open(&blob, "pk-live-123").unwrap();
        assert_eq!(opened.private_key, "sk-live-very-secret");
    }
}
