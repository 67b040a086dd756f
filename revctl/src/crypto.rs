//! Credential vault: symmetric encryption of provider API keys.
//!
//! Keys are sealed with AES-256-GCM under a process-wide key loaded from
//! (in order) the configured `secret_key`, the on-disk key file, or a
//! freshly generated key persisted to that file. Stored tokens are
//! `base64(nonce || ciphertext)`. Plaintext leaves the vault only when a
//! provider adapter is constructed for dispatch.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{Engine as _, engine::general_purpose};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::config::Config;
use crate::errors::{Error, Result};

const NONCE_LEN: usize = 12;

/// Process-wide vault handle holding the unsealed cipher.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Open the vault, bootstrapping key material if necessary.
    pub fn open(config: &Config) -> Result<Self> {
        let key_bytes = match &config.secret_key {
            Some(encoded) => general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::vault(format!("invalid secret_key: {e}")))?,
            None => load_or_create_key_file(&config.vault_key_file)?,
        };

        if key_bytes.len() != 32 {
            return Err(Error::vault(format!(
                "vault key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Seal a plaintext credential into a storable token.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| Error::vault("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(general_purpose::STANDARD.encode(out))
    }

    /// Open a stored token back into the plaintext credential.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let data = general_purpose::STANDARD
            .decode(token)
            .map_err(|e| Error::vault(format!("invalid token encoding: {e}")))?;
        if data.len() < NONCE_LEN {
            return Err(Error::vault("token too short"));
        }

        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::vault("decryption failed"))?;
        String::from_utf8(plaintext).map_err(|_| Error::vault("decrypted key is not UTF-8"))
    }
}

fn load_or_create_key_file(path: &Path) -> Result<Vec<u8>> {
    if let Ok(contents) = fs::read_to_string(path) {
        return general_purpose::STANDARD
            .decode(contents.trim())
            .map_err(|e| Error::vault(format!("invalid key file: {e}")));
    }

    let key = Aes256Gcm::generate_key(OsRng);
    fs::write(path, general_purpose::STANDARD.encode(key))?;
    info!(path = %path.display(), "Generated new vault key");
    Ok(key.to_vec())
}

/// Display form of a credential: `****` plus the last six plaintext
/// characters, right-justified to six with `*`.
pub fn mask_key(plaintext: &str) -> String {
    let chars: Vec<char> = plaintext.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(6)..].iter().collect();
    format!("****{tail:*>6}")
}

/// Light provider-specific key format validation, applied before a key is
/// accepted into the vault.
pub fn validate_key_format(provider: &str, key: &str) -> Result<()> {
    let ok = match provider.to_lowercase().as_str() {
        "openai" => key.starts_with("sk-") || key.starts_with("oai-") || key.len() > 30,
        "openrouter" => key.starts_with("sk-or-"),
        "anthropic" => key.starts_with("sk-ant-"),
        "google" => key.starts_with("AIza"),
        // unknown providers are accepted as-is
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::bad_request(format!(
            "Unrecognized {provider} key format"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault(dir: &tempfile::TempDir) -> Vault {
        let config = Config {
            vault_key_file: dir.path().join("vault_key"),
            ..Config::default()
        };
        Vault::open(&config).unwrap()
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);

        let token = vault.encrypt("sk-test-1234567890").unwrap();
        assert_ne!(token, "sk-test-1234567890");
        assert_eq!(vault.decrypt(&token).unwrap(), "sk-test-1234567890");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(&dir);

        let a = vault.encrypt("same-key").unwrap();
        let b = vault.encrypt("same-key").unwrap();
        assert_ne!(a, b);
        assert_eq!(vault.decrypt(&a).unwrap(), vault.decrypt(&b).unwrap());
    }

    #[test]
    fn key_file_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            vault_key_file: dir.path().join("vault_key"),
            ..Config::default()
        };

        let token = Vault::open(&config).unwrap().encrypt("sk-abc").unwrap();
        // A second vault over the same key file must decrypt tokens from the first.
        let reopened = Vault::open(&config).unwrap();
        assert_eq!(reopened.decrypt(&token).unwrap(), "sk-abc");
    }

    #[test]
    fn masked_key_shows_only_tail() {
        assert_eq!(mask_key("sk-test-1234567890"), "****567890");
        assert_eq!(mask_key("abcd"), "******abcd");
        assert_eq!(mask_key(""), "**********");
    }

    #[rstest::rstest]
    #[case("openai", "sk-abc", true)]
    #[case("openai", "short", false)]
    #[case("anthropic", "sk-ant-xyz", true)]
    #[case("anthropic", "sk-xyz", false)]
    #[case("openrouter", "sk-or-v1-abc", true)]
    #[case("openrouter", "sk-abc", false)]
    #[case("google", "AIzaSyABC", true)]
    #[case("google", "key-abc", false)]
    #[case("custom", "anything", true)]
    fn provider_prefix_validation(#[case] provider: &str, #[case] key: &str, #[case] ok: bool) {
        assert_eq!(validate_key_format(provider, key).is_ok(), ok);
    }
}
