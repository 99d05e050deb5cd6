//! Deterministic random sectors bound to the installed private key.
//!
//! Each sector comes out of a three-round ratchet. Every round derives a
//! sector from the current password and masks it. The first two rounds then
//! apply the private key and fold the result into the next password. The
//! round count and the mask stride are wire constants shared with deployed
//! peers.

use zeroize::Zeroizing;

use crate::crypto::checksum::crc32;
use crate::crypto::{
    CipherState, Digit, MASK_STRIDE, SECTOR_SIZE, SECTOR_WORDS, Sector, sector_to_password, transform,
};
use crate::error::{CryptoError, Result};

/// Starting password of every random sector.
pub const RANDOM_SEED_PASSWORD: &str = "Iyf&%d#$jhPo_t|3fgd+hf(s@;)F5D7gli^kjtrd%.kflP(7*5gt;Y1sYRC4VGL&";

const ROUNDS: usize = 3;

/// Clears the top bit of every [`MASK_STRIDE`]-th word so each key-sized
/// block reads as an integer below any full-size modulus.
pub fn mask_sector(sector: &mut [u32; SECTOR_WORDS]) {
    for j in (MASK_STRIDE..=SECTOR_WORDS).step_by(MASK_STRIDE) {
        sector[j - 1] &= 0x7fff_ffff;
    }
}

pub struct SeedRandom<'k> {
    private: &'k [Digit],
    key_len: usize,
}

impl<'k> SeedRandom<'k> {
    /// `key_len` is the effective length of `private`.
    pub fn new(private: &'k [Digit], key_len: usize) -> Self {
        Self { private, key_len }
    }

    pub fn sector_words(&self) -> Result<[u32; SECTOR_WORDS]> {
        let mut password = Zeroizing::new(RANDOM_SEED_PASSWORD.to_string());
        let mut sector = [0u32; SECTOR_WORDS];
        for round in 0..ROUNDS {
            sector = CipherState::derive_sector(password.as_bytes(), password.as_bytes())?;
            mask_sector(&mut sector);
            if round == ROUNDS - 1 {
                break;
            }
            transform(&mut sector, self.private, self.key_len)?;
            password = sector_to_password(&sector);
        }
        Ok(sector)
    }

    pub fn sector(&self) -> Result<Sector> {
        Ok(Sector::from_words(&self.sector_words()?))
    }

    /// Fills `buf`, whose length must be a power of two of at least 4.
    ///
    /// Buffers of a sector or more get a whole sector per 512-byte stride.
    /// Smaller ones get one CRC32 per word, taken over disjoint slices of a
    /// single sector.
    pub fn fill(&self, buf: &mut [u8]) -> Result<()> {
        let size = buf.len();
        if size < 4 || !size.is_power_of_two() {
            return Err(CryptoError::InvalidInput(format!(
                "random array size must be a power of two of at least 4, got {size}"
            )));
        }

        let sector = self.sector()?;
        if size >= SECTOR_SIZE {
            for chunk in buf.chunks_exact_mut(SECTOR_SIZE) {
                chunk.copy_from_slice(sector.as_bytes());
            }
        } else {
            let width = SECTOR_SIZE / size;
            for (k, out) in buf.chunks_exact_mut(4).enumerate() {
                let start = 4 * k * width;
                out.copy_from_slice(&crc32(&sector.as_bytes()[start..start + width]).to_le_bytes());
            }
        }
        Ok(())
    }
}
