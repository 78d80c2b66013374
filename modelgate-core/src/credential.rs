//! Provider credential records (§3 `ProviderCredential`) and the
//! master-key-derived AES-256-GCM codec used to decrypt them.
//!
//! Ciphertext blobs never leave this module as plaintext: [`ProviderCredential::reveal`]
//! returns a [`PlaintextCredential`] scoped to one selector call and its
//! immediate HTTP request (§4.3 "Secrets handling", §9 "Credential plaintext
//! lifetime"). `PlaintextCredential` deliberately has no `Debug`/`Display` impl.

use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    BearerKey,
    AccessSecretPair,
    Both,
}

/// One row of `provider_api_keys` (§3, §6 tenant database contract).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderCredential {
    pub id: String,
    pub provider: String,
    pub kind: CredentialKind,
    pub encrypted_bearer_key: Option<String>,
    pub encrypted_access_key: Option<String>,
    pub encrypted_secret_key: Option<String>,
    /// Lower is preferred.
    pub priority: i32,
    pub enabled: bool,
    pub health: f64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rate_limit_remaining: Option<u32>,
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Decrypted secret material for exactly one selected credential. Scope it to
/// the call that selected it and the HTTP request it authorises; never retain
/// it, log it, or put it in an error message (§9).
pub struct PlaintextCredential {
    pub bearer_key: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl ProviderCredential {
    /// Decrypts whichever ciphertext fields this credential carries.
    pub fn reveal(&self, master_key: &str) -> Result<PlaintextCredential, GatewayError> {
        let key = derive_key(master_key);
        Ok(PlaintextCredential {
            bearer_key: self
                .encrypted_bearer_key
                .as_deref()
                .map(|blob| decrypt(&key, blob))
                .transpose()?,
            access_key: self
                .encrypted_access_key
                .as_deref()
                .map(|blob| decrypt(&key, blob))
                .transpose()?,
            secret_key: self
                .encrypted_secret_key
                .as_deref()
                .map(|blob| decrypt(&key, blob))
                .transpose()?,
        })
    }

    /// Health-score update after a successful call (§3 invariant: recovery
    /// delta ≈0.01, clamped to [0,1]).
    pub fn record_success(&mut self) {
        self.health = (self.health + 0.01).min(1.0);
        self.success_count += 1;
    }

    /// Health-score update after a failed call, penalty keyed by error kind
    /// (§4.3 telemetry callbacks).
    pub fn record_failure(&mut self, kind: FailureKind) {
        self.health = (self.health - kind.penalty()).max(0.0);
        self.failure_count += 1;
    }
}

/// Classifies a provider failure for health-penalty and credential-disable
/// purposes (§3, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    RateLimit,
    Auth,
    Generic,
}

impl FailureKind {
    pub fn penalty(self) -> f64 {
        match self {
            FailureKind::RateLimit => 0.02,
            FailureKind::Auth => 0.5,
            FailureKind::Generic => 0.05,
        }
    }
}

/// Encrypts `plaintext` for storage as one of `ProviderCredential`'s
/// ciphertext fields. Exposed for the data-access port's write path and for
/// tests; the request path only ever decrypts.
pub fn encrypt_secret(master_key: &str, plaintext: &str) -> Result<String, GatewayError> {
    let key = derive_key(master_key);
    encrypt(&key, plaintext)
}

fn derive_key(master_key: &str) -> [u8; 32] {
    let hash = digest::digest(&digest::SHA256, master_key.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(hash.as_ref());
    key
}

fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, GatewayError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;
    let sealing_key = LessSafeKey::new(unbound);

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.as_bytes().to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&in_out);

    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.encode(combined))
}

fn decrypt(key: &[u8; 32], encoded: &str) -> Result<String, GatewayError> {
    use base64::Engine;
    let combined = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;

    if combined.len() < NONCE_LEN {
        return Err(GatewayError::CredentialDecryptFailed);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce_arr: [u8; NONCE_LEN] = nonce_bytes
        .try_into()
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;
    let nonce = Nonce::assume_unique_for_key(nonce_arr);

    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;
    let opening_key = LessSafeKey::new(unbound);

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| GatewayError::CredentialDecryptFailed)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| GatewayError::CredentialDecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_credential(ciphertext: String) -> ProviderCredential {
        ProviderCredential {
            id: "cred-1".into(),
            provider: "openai".into(),
            kind: CredentialKind::BearerKey,
            encrypted_bearer_key: Some(ciphertext),
            encrypted_access_key: None,
            encrypted_secret_key: None,
            priority: 0,
            enabled: true,
            health: 1.0,
            success_count: 0,
            failure_count: 0,
            rate_limit_remaining: None,
            rate_limit_reset_at: None,
            last_used_at: None,
        }
    }

    #[test]
    fn round_trips_through_encrypt_and_reveal() {
        let ciphertext = encrypt_secret("master-key", "sk-live-secret").unwrap();
        let cred = sample_credential(ciphertext);
        let plaintext = cred.reveal("master-key").unwrap();
        assert_eq!(plaintext.bearer_key.as_deref(), Some("sk-live-secret"));
    }

    #[test]
    fn wrong_master_key_fails_to_decrypt() {
        let ciphertext = encrypt_secret("right-key", "sk-live-secret").unwrap();
        let cred = sample_credential(ciphertext);
        let result = cred.reveal("wrong-key");
        assert!(matches!(result, Err(GatewayError::CredentialDecryptFailed)));
    }

    #[test]
    fn health_recovery_delta_clamped_to_one() {
        let mut cred = sample_credential(String::new());
        cred.health = 0.999;
        cred.record_success();
        assert_eq!(cred.health, 1.0);
    }

    #[test]
    fn auth_failure_penalty_is_half() {
        let mut cred = sample_credential(String::new());
        cred.health = 1.0;
        cred.record_failure(FailureKind::Auth);
        assert_eq!(cred.health, 0.5);
    }

    #[test]
    fn failure_penalty_never_drops_below_zero() {
        let mut cred = sample_credential(String::new());
        cred.health = 0.1;
        cred.record_failure(FailureKind::Auth);
        assert_eq!(cred.health, 0.0);
    }
}
