use std::sync::atomic::{AtomicUsize, Ordering};

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{
    CipherState, DNET_KEYLEN, Digit, KEYS_BLOB_LEN, KEYS_BLOB_SECTORS, SECTOR_WORDS, detect_key_length,
};
use crate::error::{CryptoError, Result};

/// Which half of the installed key pair an operation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    Private,
    Public,
}

/// Full-length dnet key pair: `private` then `public`, 256 digits each.
///
/// Serialised as 2048 little-endian bytes, which is also the unit that gets
/// wrapped under a user cipher, one 512-byte chunk per sector number.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    private: [Digit; DNET_KEYLEN],
    public: [Digit; DNET_KEYLEN],
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyPair { .. }")
    }
}

impl KeyPair {
    pub fn empty() -> Self {
        Self {
            private: [0; DNET_KEYLEN],
            public: [0; DNET_KEYLEN],
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() != KEYS_BLOB_LEN {
            return Err(CryptoError::InvalidInput(format!(
                "key blob must be {KEYS_BLOB_LEN} bytes, got {}",
                data.len()
            )));
        }
        let mut pair = Self::empty();
        let (private, public) = data.split_at(KEYS_BLOB_LEN / 2);
        read_digits(&mut pair.private, private);
        read_digits(&mut pair.public, public);
        Ok(pair)
    }

    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(KEYS_BLOB_LEN));
        for digit in self.private.iter().chain(self.public.iter()) {
            out.extend_from_slice(&digit.to_le_bytes());
        }
        out
    }

    pub fn private(&self) -> &[Digit] {
        &self.private
    }

    pub fn public(&self) -> &[Digit] {
        &self.public
    }

    pub fn slot(&self, slot: KeySlot) -> &[Digit] {
        match slot {
            KeySlot::Private => &self.private,
            KeySlot::Public => &self.public,
        }
    }

    pub fn halves_mut(&mut self) -> (&mut [Digit], &mut [Digit]) {
        (&mut self.private, &mut self.public)
    }

    /// Encrypts chunk `i` of the blob at sector number `!i`.
    pub fn wrap_with(&mut self, cipher: &CipherState) {
        for i in 0..KEYS_BLOB_SECTORS {
            cipher.encrypt_array(self.chunk_mut(i), !(i as u64));
        }
    }

    pub fn unwrap_with(&mut self, cipher: &CipherState) {
        for i in 0..KEYS_BLOB_SECTORS {
            cipher.decrypt_array(self.chunk_mut(i), !(i as u64));
        }
    }

    fn chunk_mut(&mut self, i: usize) -> &mut [Digit] {
        let per_half = DNET_KEYLEN / SECTOR_WORDS;
        let (half, j) = if i < per_half {
            (&mut self.private, i)
        } else {
            (&mut self.public, i - per_half)
        };
        &mut half[j * SECTOR_WORDS..(j + 1) * SECTOR_WORDS]
    }
}

fn read_digits(out: &mut [Digit], bytes: &[u8]) {
    for (digit, chunk) in out.iter_mut().zip(bytes.chunks_exact(4)) {
        *digit = Digit::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
}

/// Per-slot effective key lengths; zero means "not detected yet".
#[derive(Debug, Default)]
pub(crate) struct KeyLenCache {
    private: AtomicUsize,
    public: AtomicUsize,
}

impl KeyLenCache {
    fn cell(&self, slot: KeySlot) -> &AtomicUsize {
        match slot {
            KeySlot::Private => &self.private,
            KeySlot::Public => &self.public,
        }
    }

    /// Caller must hold at least a read lock on `keys`.
    pub(crate) fn get_or_detect(&self, slot: KeySlot, keys: &KeyPair) -> usize {
        let cell = self.cell(slot);
        match cell.load(Ordering::Acquire) {
            0 => {
                let len = detect_key_length(keys.slot(slot), DNET_KEYLEN);
                cell.store(len, Ordering::Release);
                len
            }
            len => len,
        }
    }

    /// Caller must hold the write lock on the keys being replaced.
    pub(crate) fn invalidate(&self) {
        self.private.store(0, Ordering::Release);
        self.public.store(0, Ordering::Release);
    }
}
