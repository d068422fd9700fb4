//! Noise seed lifecycle: secure generation, account-bound encryption and rotation.
//!
//! Seeds are encrypted with AES-256-GCM using the owning account id as
//! associated data, so an envelope produced for one account fails
//! authentication when opened for any other account.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::profile::FingerprintProfile;

/// Current version of the encrypted envelope layout.
pub const ENVELOPE_VERSION: u32 = 1;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HKDF_SALT: &[u8] = b"ki-fingerprint/seed-manager";
const HKDF_INFO_KEY: &[u8] = b"noise-seed-encryption-v1";
const HKDF_INFO_HASH: &[u8] = b"noise-seed-hash-v1";

/// Errors raised by seed encryption and decryption.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The envelope was not produced for this account, or was tampered with.
    #[error("Seed authentication failed: envelope does not belong to this account or was modified")]
    Authentication,

    /// The envelope is structurally malformed.
    #[error("Failed to decode seed envelope: {0}")]
    Decode(String),

    /// The envelope was written by an unknown format version.
    #[error("Unsupported seed envelope version: {0}")]
    UnsupportedVersion(u32),

    /// The cipher rejected the encryption request.
    #[error("Seed encryption failed")]
    Encryption,

    /// The configured secret could not be turned into a key.
    #[error("Seed key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Authenticated ciphertext of a 32-bit seed. Binary fields are hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSeed {
    pub iv: String,
    pub auth_tag: String,
    pub data: String,
    pub version: u32,
}

/// Either a plain seed or its encrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedValue {
    Plain(u32),
    Encrypted(EncryptedSeed),
}

/// Noise seed as stored on a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseSeed {
    pub encrypted: bool,
    pub value: SeedValue,
}

impl NoiseSeed {
    pub fn plain(seed: u32) -> Self {
        Self {
            encrypted: false,
            value: SeedValue::Plain(seed),
        }
    }

    pub fn sealed(envelope: EncryptedSeed) -> Self {
        Self {
            encrypted: true,
            value: SeedValue::Encrypted(envelope),
        }
    }

    /// The cleartext seed, when stored unencrypted.
    pub fn plain_value(&self) -> Option<u32> {
        match self.value {
            SeedValue::Plain(seed) => Some(seed),
            SeedValue::Encrypted(_) => None,
        }
    }

    /// True when the `encrypted` flag agrees with the stored value.
    pub fn is_coherent(&self) -> bool {
        matches!(
            (&self.value, self.encrypted),
            (SeedValue::Plain(_), false) | (SeedValue::Encrypted(_), true)
        )
    }
}

/// Options for [`SeedManager::rotate_seed`].
#[derive(Debug, Clone, Default)]
pub struct RotateOptions {
    pub reason: Option<String>,
}

/// Result of a seed rotation. Only a keyed hash of the retired seed is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedRotation {
    pub new_seed: u32,
    pub previous_seed_hash: String,
    pub rotated_at: DateTime<Utc>,
    pub reason: String,
}

/// Exportable view of a profile's noise seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedExport {
    pub included_seed: bool,
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SeedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_version: Option<u32>,
}

/// Generates a seed from the operating system's CSPRNG.
pub fn generate_secure_seed() -> u32 {
    OsRng.next_u32()
}

/// Owner of the seed encryption key.
///
/// Key material is zeroized when the manager is dropped.
pub struct SeedManager {
    key: Zeroizing<[u8; KEY_LEN]>,
    hash_key: Zeroizing<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for SeedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedManager").finish_non_exhaustive()
    }
}

impl SeedManager {
    /// Creates a manager from raw key material.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        let key = Zeroizing::new(key);
        let mut hash_key = Zeroizing::new([0u8; KEY_LEN]);
        // Expanding 32 bytes from a 32-byte PRK cannot exceed the HKDF limit.
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), key.as_slice());
        if hk.expand(HKDF_INFO_HASH, hash_key.as_mut_slice()).is_err() {
            hash_key.copy_from_slice(key.as_slice());
        }
        Self { key, hash_key }
    }

    /// Derives the key from a configured secret using HKDF-SHA256.
    ///
    /// A 64-character hex secret is used as input keying material directly;
    /// anything else is treated as a passphrase.
    pub fn from_secret(secret: &str) -> Result<Self, SeedError> {
        if secret.is_empty() {
            return Err(SeedError::KeyDerivation("secret cannot be empty".to_string()));
        }

        let ikm = Zeroizing::new(match hex::decode(secret) {
            Ok(bytes) if bytes.len() == KEY_LEN => bytes,
            _ => secret.as_bytes().to_vec(),
        });

        let mut okm = [0u8; KEY_LEN];
        Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm.as_slice())
            .expand(HKDF_INFO_KEY, &mut okm)
            .map_err(|e| SeedError::KeyDerivation(e.to_string()))?;

        let manager = Self::new(okm);
        zeroize::Zeroize::zeroize(&mut okm);
        Ok(manager)
    }

    /// Creates a manager with a fresh random key.
    pub fn random() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        let manager = Self::new(key);
        zeroize::Zeroize::zeroize(&mut key);
        manager
    }

    /// Generates a seed from the operating system's CSPRNG.
    pub fn generate_secure_seed(&self) -> u32 {
        generate_secure_seed()
    }

    fn cipher(&self) -> Result<Aes256Gcm, SeedError> {
        Aes256Gcm::new_from_slice(self.key.as_slice())
            .map_err(|e| SeedError::KeyDerivation(e.to_string()))
    }

    /// Encrypts `seed` and binds the ciphertext to `account_id`.
    pub fn encrypt_seed(&self, seed: u32, account_id: &str) -> Result<EncryptedSeed, SeedError> {
        let cipher = self.cipher()?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let plaintext = Zeroizing::new(seed.to_be_bytes());
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: plaintext.as_slice(),
                    aad: account_id.as_bytes(),
                },
            )
            .map_err(|_| SeedError::Encryption)?;

        if sealed.len() < TAG_LEN {
            return Err(SeedError::Encryption);
        }
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(EncryptedSeed {
            iv: hex::encode(iv),
            auth_tag: hex::encode(tag),
            data: hex::encode(data),
            version: ENVELOPE_VERSION,
        })
    }

    /// Decrypts an envelope produced for `account_id`.
    ///
    /// # Errors
    ///
    /// [`SeedError::Authentication`] when the account differs from the one
    /// used at encryption time or the envelope was modified;
    /// [`SeedError::Decode`] when fields are not valid hex or have the wrong
    /// length.
    pub fn decrypt_seed(&self, envelope: &EncryptedSeed, account_id: &str) -> Result<u32, SeedError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(SeedError::UnsupportedVersion(envelope.version));
        }

        let iv = decode_field("iv", &envelope.iv, Some(IV_LEN))?;
        let tag = decode_field("authTag", &envelope.auth_tag, Some(TAG_LEN))?;
        let mut sealed = decode_field("data", &envelope.data, None)?;
        sealed.extend_from_slice(&tag);

        let plaintext = Zeroizing::new(
            self.cipher()?
                .decrypt(
                    Nonce::from_slice(&iv),
                    Payload {
                        msg: &sealed,
                        aad: account_id.as_bytes(),
                    },
                )
                .map_err(|_| SeedError::Authentication)?,
        );

        let bytes: [u8; 4] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| SeedError::Decode(format!("expected 4 seed bytes, got {}", plaintext.len())))?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Replaces `old_seed` with a fresh seed, keeping only a hash of the old one.
    pub fn rotate_seed(&self, account_id: &str, old_seed: u32, options: RotateOptions) -> SeedRotation {
        let mut new_seed = generate_secure_seed();
        while new_seed == old_seed {
            new_seed = generate_secure_seed();
        }

        let rotation = SeedRotation {
            new_seed,
            previous_seed_hash: self.hash_seed(old_seed),
            rotated_at: Utc::now(),
            reason: options.reason.unwrap_or_else(|| "manual".to_string()),
        };

        info!(
            account = %account_id,
            previous = %&rotation.previous_seed_hash[..12],
            reason = %rotation.reason,
            "Rotated noise seed"
        );
        rotation
    }

    /// One-way keyed hash of a seed, hex encoded, for logs and audit trails.
    pub fn hash_seed(&self, seed: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_key.as_slice());
        hasher.update(seed.to_be_bytes());
        hex::encode(hasher.finalize())
    }

    /// Builds the exportable form of a stored seed.
    ///
    /// With `include_seed = false` only the non-secret shape of the seed is
    /// reported.
    pub fn prepare_for_export(&self, seed: &NoiseSeed, include_seed: bool) -> SeedExport {
        let envelope_version = match &seed.value {
            SeedValue::Encrypted(env) => Some(env.version),
            SeedValue::Plain(_) => None,
        };

        if include_seed {
            SeedExport {
                included_seed: true,
                encrypted: seed.encrypted,
                value: Some(seed.value.clone()),
                envelope_version,
            }
        } else {
            SeedExport {
                included_seed: false,
                encrypted: seed.encrypted,
                value: None,
                envelope_version,
            }
        }
    }

    /// Encrypts a plain seed for `account_id`.
    pub fn seal(&self, seed: u32, account_id: &str) -> Result<NoiseSeed, SeedError> {
        Ok(NoiseSeed::sealed(self.encrypt_seed(seed, account_id)?))
    }

    /// Returns the cleartext seed, decrypting it for `account_id` when needed.
    pub fn open(&self, seed: &NoiseSeed, account_id: &str) -> Result<u32, SeedError> {
        match &seed.value {
            SeedValue::Plain(value) => Ok(*value),
            SeedValue::Encrypted(envelope) => {
                debug!(account = %account_id, "Opening encrypted noise seed");
                self.decrypt_seed(envelope, account_id)
            }
        }
    }

    /// Moves a profile's plain seed into an envelope bound to its account.
    ///
    /// Returns `false` when there is nothing to seal: no seed, an already
    /// encrypted seed, or a profile without an account.
    pub fn seal_profile_seed(&self, profile: &mut FingerprintProfile) -> Result<bool, SeedError> {
        let (Some(seed), Some(account)) = (profile.plain_seed(), profile.account_id.as_deref()) else {
            return Ok(false);
        };
        profile.noise_seed = Some(self.seal(seed, account)?);
        Ok(true)
    }

    /// Cleartext seed of a profile, or `None` when it has none.
    pub fn open_profile_seed(&self, profile: &FingerprintProfile) -> Result<Option<u32>, SeedError> {
        let Some(seed) = &profile.noise_seed else {
            return Ok(None);
        };
        let account = profile.account_id.as_deref().unwrap_or_default();
        self.open(seed, account).map(Some)
    }
}

fn decode_field(name: &str, value: &str, expected_len: Option<usize>) -> Result<Vec<u8>, SeedError> {
    let bytes = hex::decode(value).map_err(|e| SeedError::Decode(format!("{}: {}", name, e)))?;
    if let Some(len) = expected_len {
        if bytes.len() != len {
            return Err(SeedError::Decode(format!(
                "{}: expected {} bytes, got {}",
                name,
                len,
                bytes.len()
            )));
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_same_account() {
        let manager = SeedManager::random();
        let envelope = manager.encrypt_seed(123_456_789, "acct-A").unwrap();
        assert_eq!(envelope.version, ENVELOPE_VERSION);
        assert_eq!(envelope.iv.len(), IV_LEN * 2);
        assert_eq!(envelope.auth_tag.len(), TAG_LEN * 2);
        assert_eq!(manager.decrypt_seed(&envelope, "acct-A").unwrap(), 123_456_789);
    }

    #[test]
    fn test_wrong_account_fails_authentication() {
        let manager = SeedManager::random();
        let envelope = manager.encrypt_seed(42, "acct-A").unwrap();
        let err = manager.decrypt_seed(&envelope, "acct-B").unwrap_err();
        assert!(matches!(err, SeedError::Authentication));
    }

    #[test]
    fn test_malformed_envelope_is_decode_error() {
        let manager = SeedManager::random();
        let mut envelope = manager.encrypt_seed(42, "acct-A").unwrap();
        envelope.iv = "zz".to_string();
        assert!(matches!(
            manager.decrypt_seed(&envelope, "acct-A"),
            Err(SeedError::Decode(_))
        ));
    }

    #[test]
    fn test_tampered_data_fails_authentication() {
        let manager = SeedManager::random();
        let mut envelope = manager.encrypt_seed(42, "acct-A").unwrap();
        let flipped = if envelope.data.starts_with('0') { "1" } else { "0" };
        envelope.data.replace_range(0..1, flipped);
        assert!(matches!(
            manager.decrypt_seed(&envelope, "acct-A"),
            Err(SeedError::Authentication)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let manager = SeedManager::random();
        let mut envelope = manager.encrypt_seed(42, "acct-A").unwrap();
        envelope.version = 9;
        assert!(matches!(
            manager.decrypt_seed(&envelope, "acct-A"),
            Err(SeedError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_secret_derivation_is_stable() {
        let a = SeedManager::from_secret("correct horse battery staple").unwrap();
        let b = SeedManager::from_secret("correct horse battery staple").unwrap();
        let envelope = a.encrypt_seed(7, "acct").unwrap();
        assert_eq!(b.decrypt_seed(&envelope, "acct").unwrap(), 7);
        assert_eq!(a.hash_seed(7), b.hash_seed(7));
        assert!(SeedManager::from_secret("").is_err());
    }

    #[test]
    fn test_rotation_keeps_only_hash() {
        let manager = SeedManager::random();
        let rotation = manager.rotate_seed(
            "acct",
            99,
            RotateOptions {
                reason: Some("scheduled".to_string()),
            },
        );
        assert_ne!(rotation.new_seed, 99);
        assert_eq!(rotation.previous_seed_hash, manager.hash_seed(99));
        assert_eq!(rotation.previous_seed_hash.len(), 64);
        assert_eq!(rotation.reason, "scheduled");
        let json = serde_json::to_string(&rotation).unwrap();
        assert!(json.contains("previousSeedHash"));
    }

    #[test]
    fn test_export_without_seed_strips_secret() {
        let manager = SeedManager::random();
        let sealed = manager.seal(5, "acct").unwrap();
        let export = manager.prepare_for_export(&sealed, false);
        assert!(!export.included_seed);
        assert!(export.encrypted);
        assert!(export.value.is_none());
        assert_eq!(export.envelope_version, Some(ENVELOPE_VERSION));

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["includedSeed"], false);
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_seal_and_open() {
        let manager = SeedManager::random();
        let sealed = manager.seal(31337, "acct").unwrap();
        assert!(sealed.is_coherent());
        assert_eq!(manager.open(&sealed, "acct").unwrap(), 31337);
        assert_eq!(manager.open(&NoiseSeed::plain(8), "any").unwrap(), 8);
    }

    #[test]
    fn test_noise_seed_json_shapes() {
        let plain: NoiseSeed = serde_json::from_str(r#"{"encrypted":false,"value":17}"#).unwrap();
        assert_eq!(plain.plain_value(), Some(17));

        let manager = SeedManager::random();
        let sealed = manager.seal(17, "acct").unwrap();
        let json = serde_json::to_string(&sealed).unwrap();
        let back: NoiseSeed = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sealed);
    }

    #[test]
    fn test_profile_seed_sealing() {
        let manager = SeedManager::random();
        let mut profile = FingerprintProfile::default();
        profile.noise_seed = Some(NoiseSeed::plain(99));
        assert!(!manager.seal_profile_seed(&mut profile).unwrap());

        profile.account_id = Some("acct-9".to_string());
        assert!(manager.seal_profile_seed(&mut profile).unwrap());
        assert!(profile.noise_seed.as_ref().unwrap().encrypted);
        assert_eq!(profile.plain_seed(), None);
        assert_eq!(manager.open_profile_seed(&profile).unwrap(), Some(99));

        profile.account_id = Some("acct-other".to_string());
        assert!(matches!(
            manager.open_profile_seed(&profile),
            Err(SeedError::Authentication)
        ));
    }
}
