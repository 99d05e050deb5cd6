//! Lifecycle of the node's dnet key pair.
//!
//! A [`KeyVault`] owns one full-length [`KeyPair`] behind a
//! `parking_lot::RwLock`. Generation, loading, wrapping and unwrapping take
//! the write lock. Transforms, random generation and verification only read,
//! so they run concurrently. Effective key lengths are cached per slot and
//! dropped whenever the keys change.

use std::fmt;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::CryptoConfig;
use crate::crypto::{
    CipherState, DNET_KEYLEN, Digit, SECTOR_WORDS, Sector, SeedStream, detect_key_length, generate_keypair, transform,
};
use crate::error::{CryptoError, Result, VerifyStep};
use crate::keys::{KeyLenCache, KeyPair, KeySlot};
use crate::random::SeedRandom;

const ENTROPY_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    Empty,
    Generated,
    /// Installed from raw bytes; wrapped or not is unknown until verified.
    Loaded,
    Wrapped,
    Unwrapped,
    Verified,
}

impl VaultState {
    fn name(self) -> &'static str {
        match self {
            VaultState::Empty => "empty",
            VaultState::Generated => "generated",
            VaultState::Loaded => "loaded",
            VaultState::Wrapped => "wrapped",
            VaultState::Unwrapped => "unwrapped",
            VaultState::Verified => "verified",
        }
    }
}

impl fmt::Display for VaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct VaultInner {
    keys: KeyPair,
    state: VaultState,
    user: Option<CipherState>,
}

pub struct KeyVault {
    inner: RwLock<VaultInner>,
    key_len: KeyLenCache,
    config: CryptoConfig,
}

impl Default for KeyVault {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyVault {
    pub fn new() -> Self {
        Self::with_config(CryptoConfig::default())
    }

    pub fn with_config(config: CryptoConfig) -> Self {
        Self {
            inner: RwLock::new(VaultInner {
                keys: KeyPair::empty(),
                state: VaultState::Empty,
                user: None,
            }),
            key_len: KeyLenCache::default(),
            config,
        }
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    pub fn state(&self) -> VaultState {
        self.inner.read().state
    }

    /// Installs the cipher derived from the user's password.
    pub fn set_user_password(&self, password: &str) -> Result<()> {
        let cipher = CipherState::for_user_password(password)?;
        self.inner.write().user = Some(cipher);
        debug!("user cipher installed");
        Ok(())
    }

    /// Generates a fresh key pair of `bits` from OS entropy.
    pub fn generate(&self, bits: usize) -> Result<()> {
        let mut entropy = Zeroizing::new([0u8; ENTROPY_BYTES]);
        getrandom::fill(&mut entropy[..]).map_err(|e| CryptoError::Entropy(e.to_string()))?;

        let mut seed = Zeroizing::new(String::with_capacity(ENTROPY_BYTES * 2));
        for b in entropy.iter() {
            seed.push_str(&format!("{b:02x}"));
        }
        self.generate_seeded(bits, &seed)
    }

    /// Generates a key pair of `bits` deterministically from `seed`.
    pub fn generate_seeded(&self, bits: usize, seed: &str) -> Result<()> {
        let mut rng = SeedStream::new(seed.as_bytes())?;
        let pair = generate_keypair(bits, &mut rng)?;

        let mut inner = self.inner.write();
        let (private, public) = inner.keys.halves_mut();
        pair.tile_into(private, public);
        inner.state = VaultState::Generated;
        self.key_len.invalidate();
        info!(bits, key_len = pair.key_len(), "generated dnet key pair");
        Ok(())
    }

    /// Installs a raw 2048-byte key blob as-is.
    pub fn load_raw(&self, bytes: &[u8]) -> Result<()> {
        let keys = KeyPair::from_bytes(bytes)?;
        let mut inner = self.inner.write();
        inner.keys = keys;
        inner.state = VaultState::Loaded;
        self.key_len.invalidate();
        debug!("raw key blob loaded");
        Ok(())
    }

    pub fn wrap(&self, cipher: &CipherState) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.state {
            VaultState::Generated | VaultState::Loaded | VaultState::Unwrapped | VaultState::Verified => {}
            state => return Err(CryptoError::InvalidState(state.name())),
        }
        inner.keys.wrap_with(cipher);
        inner.state = VaultState::Wrapped;
        self.key_len.invalidate();
        debug!("key pair wrapped");
        Ok(())
    }

    pub fn unwrap(&self, cipher: &CipherState) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.state {
            VaultState::Wrapped | VaultState::Loaded => {}
            state => return Err(CryptoError::InvalidState(state.name())),
        }
        inner.keys.unwrap_with(cipher);
        inner.state = VaultState::Unwrapped;
        self.key_len.invalidate();
        debug!("key pair unwrapped");
        Ok(())
    }

    /// Round-trips a random sector through both keys, in both orders.
    pub fn verify(&self) -> Result<()> {
        let inner = self.inner.upgradable_read();
        if inner.state == VaultState::Empty {
            return Err(CryptoError::InvalidState(VaultState::Empty.name()));
        }

        let private_len = self.key_len.get_or_detect(KeySlot::Private, &inner.keys);
        let public_len = self.key_len.get_or_detect(KeySlot::Public, &inner.keys);
        if let Err(step) = self_test(&inner.keys, private_len, public_len) {
            warn!(code = step.code(), %step, "dnet key verification failed");
            return Err(CryptoError::KeyVerification(step));
        }

        let mut inner = RwLockUpgradableReadGuard::upgrade(inner);
        inner.state = VaultState::Verified;
        info!("dnet keys verified");
        Ok(())
    }

    /// Sets the user password, generates a full-length key pair from
    /// `random` and returns it wrapped. The vault keeps the unwrapped keys.
    pub fn create(&self, password: &str, random: &str) -> Result<Zeroizing<Vec<u8>>> {
        self.set_user_password(password)?;
        self.generate_seeded(self.config.key_bits(), random)?;
        self.export_wrapped()
    }

    /// Loads a stored key blob and verifies it. A blob that fails is taken
    /// to be wrapped under `password`: it is unwrapped and verified again.
    ///
    /// Nothing is installed unless one of the two candidates verifies, and
    /// the keys, user cipher and state are replaced under one write lock.
    pub fn open(&self, password: &str, blob: &[u8]) -> Result<()> {
        let mut keys = KeyPair::from_bytes(blob)?;
        let cipher = CipherState::for_user_password(password)?;

        let mut inner = self.inner.write();
        if check_pair(&keys).is_err() {
            debug!("stored keys did not verify as plain, trying the user cipher");
            keys.unwrap_with(&cipher);
            if let Err(step) = check_pair(&keys) {
                warn!(code = step.code(), %step, "stored keys failed verification");
                return Err(CryptoError::KeyVerification(step));
            }
        }

        *inner = VaultInner {
            keys,
            state: VaultState::Verified,
            user: Some(cipher),
        };
        self.key_len.invalidate();
        info!("dnet keys opened and verified");
        Ok(())
    }

    /// Blob of the live keys, wrapped under the user cipher when one is
    /// installed.
    pub fn export_wrapped(&self) -> Result<Zeroizing<Vec<u8>>> {
        let inner = self.inner.read();
        if inner.state == VaultState::Empty {
            return Err(CryptoError::InvalidState(VaultState::Empty.name()));
        }
        let mut copy = inner.keys.clone();
        if let Some(cipher) = &inner.user {
            copy.wrap_with(cipher);
        }
        Ok(copy.to_bytes())
    }

    /// Blob of the live keys exactly as held.
    pub fn key_bytes(&self) -> Zeroizing<Vec<u8>> {
        self.inner.read().keys.to_bytes()
    }

    /// Encrypts wallet key `n` under the user cipher.
    pub fn encrypt_wallet_key(&self, key: &[u8; 32], n: u64) -> Result<[u8; 32]> {
        self.with_user_cipher(key, |cipher, words| cipher.encrypt_array(words, n))
    }

    pub fn decrypt_wallet_key(&self, key: &[u8; 32], n: u64) -> Result<[u8; 32]> {
        self.with_user_cipher(key, |cipher, words| cipher.decrypt_array(words, n))
    }

    fn with_user_cipher(&self, key: &[u8; 32], op: impl FnOnce(&CipherState, &mut [u32])) -> Result<[u8; 32]> {
        let inner = self.inner.read();
        let cipher = inner.user.as_ref().ok_or(CryptoError::InvalidState("no user password"))?;

        let mut words = Zeroizing::new([0u32; 8]);
        for (word, chunk) in words.iter_mut().zip(key.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        op(cipher, &mut words[..]);

        let mut out = [0u8; 32];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Ok(out)
    }

    pub fn detect_key_length(&self, slot: KeySlot) -> usize {
        let inner = self.inner.read();
        self.key_len.get_or_detect(slot, &inner.keys)
    }

    /// Applies one half of the installed key to `buf`.
    pub fn transform(&self, slot: KeySlot, buf: &mut [Digit]) -> Result<()> {
        let inner = self.inner.read();
        let len = self.key_len.get_or_detect(slot, &inner.keys);
        transform(buf, inner.keys.slot(slot), len)
    }

    pub fn random_sector(&self) -> Result<Sector> {
        let inner = self.inner.read();
        let len = self.key_len.get_or_detect(KeySlot::Private, &inner.keys);
        SeedRandom::new(inner.keys.private(), len).sector()
    }

    pub fn random_words(&self) -> Result<[u32; SECTOR_WORDS]> {
        let inner = self.inner.read();
        let len = self.key_len.get_or_detect(KeySlot::Private, &inner.keys);
        SeedRandom::new(inner.keys.private(), len).sector_words()
    }

    pub fn generate_random_array(&self, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.read();
        let len = self.key_len.get_or_detect(KeySlot::Private, &inner.keys);
        SeedRandom::new(inner.keys.private(), len).fill(buf)
    }
}

/// Self-test of a pair not yet installed, with lengths detected fresh.
fn check_pair(keys: &KeyPair) -> std::result::Result<(), VerifyStep> {
    let private_len = detect_key_length(keys.private(), DNET_KEYLEN);
    let public_len = detect_key_length(keys.public(), DNET_KEYLEN);
    self_test(keys, private_len, public_len)
}

/// Round trip of one random sector, private key first and then public key
/// first. Each failure maps to the step that produced it.
fn self_test(keys: &KeyPair, private_len: usize, public_len: usize) -> std::result::Result<(), VerifyStep> {
    let src = SeedRandom::new(keys.private(), private_len)
        .sector_words()
        .map_err(|_| VerifyStep::PrivateFirst)?;

    let mut dest = src;
    transform(&mut dest, keys.private(), private_len).map_err(|_| VerifyStep::PrivateFirst)?;
    transform(&mut dest, keys.public(), public_len).map_err(|_| VerifyStep::PublicSecond)?;
    if dest != src {
        return Err(VerifyStep::ForwardMismatch);
    }

    let mut dest = src;
    transform(&mut dest, keys.public(), public_len).map_err(|_| VerifyStep::PublicFirst)?;
    transform(&mut dest, keys.private(), private_len).map_err(|_| VerifyStep::PrivateSecond)?;
    if dest != src {
        return Err(VerifyStep::ReverseMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEYS_BLOB_LEN;

    fn small_config() -> CryptoConfig {
        CryptoConfig::new(256, 1, None).unwrap()
    }

    fn generated(seed: &str) -> KeyVault {
        let vault = KeyVault::with_config(small_config());
        vault.generate_seeded(256, seed).unwrap();
        vault
    }

    #[test]
    fn starts_empty() {
        let vault = KeyVault::new();
        assert_eq!(vault.state(), VaultState::Empty);
        assert!(matches!(vault.verify(), Err(CryptoError::InvalidState(_))));
        assert!(matches!(vault.export_wrapped(), Err(CryptoError::InvalidState(_))));
        assert_eq!(&vault.key_bytes()[..], &[0u8; KEYS_BLOB_LEN][..]);
    }

    #[test]
    fn generated_keys_verify_and_tile() {
        let vault = generated("seed-one");
        assert_eq!(vault.state(), VaultState::Generated);
        assert_eq!(vault.detect_key_length(KeySlot::Private), 16);
        assert_eq!(vault.detect_key_length(KeySlot::Public), 16);
        vault.verify().unwrap();
        assert_eq!(vault.state(), VaultState::Verified);
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        assert_eq!(generated("same").key_bytes(), generated("same").key_bytes());
        assert_ne!(generated("same").key_bytes(), generated("other").key_bytes());
    }

    #[test]
    fn generate_from_entropy_verifies() {
        let vault = KeyVault::with_config(small_config());
        vault.generate(256).unwrap();
        vault.verify().unwrap();
        assert!(matches!(vault.generate(100), Err(CryptoError::InvalidInput(_))));
    }

    #[test]
    fn wrap_unwrap_restores_and_gates_state() {
        let vault = generated("wrap");
        let cipher = CipherState::for_user_password("pw").unwrap();
        let before = vault.key_bytes();

        assert!(matches!(vault.unwrap(&cipher), Err(CryptoError::InvalidState(_))));
        vault.wrap(&cipher).unwrap();
        assert_eq!(vault.state(), VaultState::Wrapped);
        assert_ne!(vault.key_bytes(), before);
        assert!(matches!(vault.wrap(&cipher), Err(CryptoError::InvalidState(_))));

        vault.unwrap(&cipher).unwrap();
        assert_eq!(vault.state(), VaultState::Unwrapped);
        assert_eq!(vault.key_bytes(), before);
        vault.verify().unwrap();
    }

    #[test]
    fn corrupted_key_reports_a_step() {
        let vault = generated("corrupt");
        let mut bytes = vault.key_bytes();
        // flip a bit in the private exponent; tiling breaks so the full length is used
        bytes[40] ^= 0x01;
        vault.load_raw(&bytes).unwrap();
        assert_eq!(vault.state(), VaultState::Loaded);

        match vault.verify() {
            Err(CryptoError::KeyVerification(step)) => assert!((1..=6).contains(&step.code())),
            other => panic!("expected KeyVerification, got {other:?}"),
        }
        assert_eq!(vault.state(), VaultState::Loaded);
    }

    #[test]
    fn load_raw_rejects_wrong_length() {
        let vault = KeyVault::new();
        assert!(matches!(vault.load_raw(&[0u8; 100]), Err(CryptoError::InvalidInput(_))));
        assert_eq!(vault.state(), VaultState::Empty);
    }

    #[test]
    fn create_then_open_recovers_keys() {
        let vault = KeyVault::with_config(small_config());
        let blob = vault.create("correct horse", "some random text").unwrap();
        assert_eq!(vault.state(), VaultState::Generated);
        assert_ne!(&blob[..], &vault.key_bytes()[..]);

        let restored = KeyVault::with_config(small_config());
        restored.open("correct horse", &blob).unwrap();
        assert_eq!(restored.state(), VaultState::Verified);
        assert_eq!(restored.key_bytes(), vault.key_bytes());

        let wrong = KeyVault::with_config(small_config());
        assert!(matches!(
            wrong.open("battery staple", &blob),
            Err(CryptoError::KeyVerification(_))
        ));
    }

    #[test]
    fn failed_open_keeps_previous_keys() {
        let source = KeyVault::with_config(small_config());
        let blob = source.create("right", "stored keys").unwrap();

        let vault = generated("live");
        vault.set_user_password("live password").unwrap();
        vault.verify().unwrap();
        let keys = vault.key_bytes();
        let exported = vault.export_wrapped().unwrap();

        assert!(matches!(vault.open("wrong", &blob), Err(CryptoError::KeyVerification(_))));
        assert!(matches!(vault.open("right", &blob[..100]), Err(CryptoError::InvalidInput(_))));

        assert_eq!(vault.state(), VaultState::Verified);
        assert_eq!(vault.key_bytes(), keys);
        // still wrapped under the old password, not the rejected one
        assert_eq!(vault.export_wrapped().unwrap(), exported);
        vault.verify().unwrap();
        assert_eq!(vault.detect_key_length(KeySlot::Private), 16);
    }

    #[test]
    fn failed_open_leaves_empty_vault_empty() {
        let blob = KeyVault::with_config(small_config()).create("right", "text").unwrap();
        let vault = KeyVault::with_config(small_config());
        assert!(vault.open("wrong", &blob).is_err());
        assert_eq!(vault.state(), VaultState::Empty);
        assert!(matches!(vault.encrypt_wallet_key(&[0u8; 32], 0), Err(CryptoError::InvalidState(_))));
    }

    #[test]
    fn open_accepts_plain_blob() {
        let vault = generated("plain");
        let plain = vault.key_bytes();
        let other = KeyVault::with_config(small_config());
        other.open("whatever", &plain).unwrap();
        assert_eq!(other.key_bytes(), plain);
    }

    #[test]
    fn export_without_password_is_plain() {
        let vault = generated("export");
        assert_eq!(vault.export_wrapped().unwrap(), vault.key_bytes());
        vault.set_user_password("pw").unwrap();
        assert_ne!(vault.export_wrapped().unwrap(), vault.key_bytes());
    }

    #[test]
    fn wallet_keys_need_a_password_and_round_trip() {
        let vault = KeyVault::new();
        let key = [0x11u8; 32];
        assert!(matches!(vault.encrypt_wallet_key(&key, 0), Err(CryptoError::InvalidState(_))));

        vault.set_user_password("wallet").unwrap();
        let enc0 = vault.encrypt_wallet_key(&key, 0).unwrap();
        let enc1 = vault.encrypt_wallet_key(&key, 1).unwrap();
        assert_ne!(enc0, key);
        assert_ne!(enc0, enc1);
        assert_eq!(vault.decrypt_wallet_key(&enc0, 0).unwrap(), key);
        assert_eq!(vault.decrypt_wallet_key(&enc1, 1).unwrap(), key);
    }

    #[test]
    fn transform_slots_are_inverse() {
        let vault = generated("slots");
        let mut words = vault.random_words().unwrap();
        let original = words;
        vault.transform(KeySlot::Public, &mut words).unwrap();
        assert_ne!(words, original);
        vault.transform(KeySlot::Private, &mut words).unwrap();
        assert_eq!(words, original);
    }

    #[test]
    fn random_output_follows_the_key() {
        let vault = generated("random");
        let a = vault.random_sector().unwrap();
        assert_eq!(vault.random_sector().unwrap(), a);

        let mut buf = [0u8; 1024];
        vault.generate_random_array(&mut buf).unwrap();
        assert_eq!(&buf[..512], a.as_bytes());

        vault.generate_seeded(256, "another").unwrap();
        assert_ne!(vault.random_sector().unwrap(), a);
        assert_eq!(vault.detect_key_length(KeySlot::Private), 16);
    }
}
