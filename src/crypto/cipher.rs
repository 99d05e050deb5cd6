//! Password-keyed sector cipher.
//!
//! A password expands into a 256-bit schedule and a shuffled 64Ki-entry
//! 16-bit substitution table. Encryption runs two chained passes over the
//! words (forward, then backward), whitening each word with the sector-0
//! table and a keystream bound to the sector number. Decryption undoes the
//! passes in reverse order.

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use super::checksum::{crc32, crc32_parts};
use super::sector::Sector;
use super::{PWDLEN, SECTOR_SIZE, SECTOR_WORDS};
use crate::error::{CryptoError, Result};

const TABLE_LEN: usize = 1 << 16;
const GOLDEN: u64 = 0x9E37_79B9_7F4A_7C15;
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const SECTOR_MUL: u64 = 0xD6E8_FEB8_6659_FD93;

/// Bytes in one miner message field.
pub const FIELD_SIZE: usize = 32;
const FIELD_WORDS: usize = FIELD_SIZE / 4;

pub const USER_SECTOR0_BASE: u32 = 0x4ab2_9f51;
pub const USER_SECTOR0_STEP: u32 = 0xc380_7e6d;
pub const USER_SECTOR_BASE: u64 = 0x3e9c_1d62_4a8b_570f;
pub const USER_SECTOR_STEP: u64 = 0x9d2e_61fc_5387_04ab;

pub const MINERS_PWD: &str = "minersgonnamine";
pub const SECTOR0_BASE: u32 = 0x1947_f3ac;
pub const SECTOR0_OFFSET: u32 = 0x82e9_d1b5;

const SEED_STREAM_SALT: &[u8] = b"dnet seed stream";

fn mix64(mut z: u64) -> u64 {
    z = z.wrapping_add(GOLDEN);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn keystream(sector_key: u64, index: usize) -> u64 {
    mix64(sector_key.wrapping_add((index as u64).wrapping_mul(GOLDEN)))
}

fn alloc_table() -> Result<Box<[u16]>> {
    let mut table: Vec<u16> = Vec::new();
    table
        .try_reserve_exact(TABLE_LEN)
        .map_err(|_| CryptoError::Allocation("cipher substitution table"))?;
    table.resize(TABLE_LEN, 0);
    Ok(table.into_boxed_slice())
}

fn derive_schedule(password: &[u8]) -> [u64; 4] {
    let mut schedule = [0u64; 4];
    for (lane, word) in schedule.iter_mut().enumerate() {
        let crc = crc32_parts(&[&[lane as u8], password]) as u64;
        let mut h = FNV_OFFSET ^ (lane as u64).wrapping_mul(GOLDEN);
        for &b in password {
            h = (h ^ b as u64).wrapping_mul(FNV_PRIME);
        }
        *word = mix64(h ^ (crc << 32) ^ password.len() as u64);
    }
    schedule
}

/// Cipher state derived from a password plus a 128-word sector-0 table.
pub struct CipherState {
    table: Box<[u16]>,
    inverse: Box<[u16]>,
    schedule: [u64; 4],
    sector0: [u32; SECTOR_WORDS],
}

impl Drop for CipherState {
    fn drop(&mut self) {
        self.table.zeroize();
        self.inverse.zeroize();
        self.schedule.zeroize();
        self.sector0.zeroize();
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherState").finish_non_exhaustive()
    }
}

impl CipherState {
    /// Derives a cipher state from `password` (any length, empty allowed).
    ///
    /// The sector-0 table starts zeroed; install one with
    /// [`set_sector0`](Self::set_sector0) or
    /// [`bootstrap_sector0`](Self::bootstrap_sector0).
    pub fn with_password(password: &[u8]) -> Result<Self> {
        let mut state = Self {
            table: alloc_table()?,
            inverse: alloc_table()?,
            schedule: [0; 4],
            sector0: [0; SECTOR_WORDS],
        };
        state.set_password(password);
        Ok(state)
    }

    /// Re-keys the state in place and clears the sector-0 table.
    pub fn set_password(&mut self, password: &[u8]) {
        self.schedule = derive_schedule(password);
        self.sector0 = [0; SECTOR_WORDS];

        for (i, slot) in self.table.iter_mut().enumerate() {
            *slot = i as u16;
        }
        let mut state = self.schedule[0] ^ self.schedule[2].rotate_left(29);
        for i in (1..TABLE_LEN).rev() {
            state = state.wrapping_add(GOLDEN);
            let r = mix64(state ^ self.schedule[i & 3]);
            let j = (r % (i as u64 + 1)) as usize;
            self.table.swap(i, j);
        }
        for (i, &v) in self.table.iter().enumerate() {
            self.inverse[v as usize] = i as u16;
        }
    }

    pub fn set_sector0(&mut self, table: &[u32; SECTOR_WORDS]) {
        self.sector0 = *table;
    }

    pub fn sector0(&self) -> &[u32; SECTOR_WORDS] {
        &self.sector0
    }

    /// Runs the sector-0 self-encryption loop: the table starts as
    /// `base + i * step` and, 128 times, is installed and then encrypted at
    /// sector number `sector_no(i)`.
    pub fn bootstrap_sector0(&mut self, base: u32, step: u32, sector_no: impl Fn(u32) -> u64) {
        let mut table = [0u32; SECTOR_WORDS];
        for (i, word) in table.iter_mut().enumerate() {
            *word = base.wrapping_add((i as u32).wrapping_mul(step));
        }
        for i in 0..SECTOR_WORDS as u32 {
            self.set_sector0(&table);
            self.encrypt_array(&mut table, sector_no(i));
        }
        table.zeroize();
    }

    /// Cipher state for a user password, as used to wrap dnet keys and
    /// wallet secrets.
    pub fn for_user_password(password: &str) -> Result<Self> {
        let mut state = Self::with_password(password.as_bytes())?;
        state.bootstrap_sector0(USER_SECTOR0_BASE, USER_SECTOR0_STEP, |i| {
            USER_SECTOR_BASE.wrapping_add((i as u64).wrapping_mul(USER_SECTOR_STEP))
        });
        Ok(state)
    }

    /// Cipher state shared by every node and miner for the miner link.
    pub fn for_miners() -> Result<Self> {
        let mut state = Self::with_password(MINERS_PWD.as_bytes())?;
        state.bootstrap_sector0(SECTOR0_BASE, SECTOR0_OFFSET, |i| {
            SECTOR0_BASE.wrapping_add(i.wrapping_mul(SECTOR0_OFFSET)) as u64
        });
        Ok(state)
    }

    /// Protocol cipher keyed by a distributed sector-0 table: the password
    /// is the table's CRC digest string.
    pub fn from_sector0(table: &[u32; SECTOR_WORDS]) -> Result<Self> {
        let password = sector_to_password(table);
        let mut state = Self::with_password(password.as_bytes())?;
        state.set_sector0(table);
        Ok(state)
    }

    /// Deterministically derives a sector from a password and a salt.
    pub fn derive_sector(password: &[u8], salt: &[u8]) -> Result<[u32; SECTOR_WORDS]> {
        let mut state = Self::with_password(password)?;
        let mut table = [0u32; SECTOR_WORDS];
        for (i, word) in table.iter_mut().enumerate() {
            *word = crc32_parts(&[salt, &(i as u32).to_le_bytes()]);
        }
        state.set_sector0(&table);

        let mut out = [0u32; SECTOR_WORDS];
        for (i, word) in out.iter_mut().enumerate() {
            *word = crc32_parts(&[&(i as u32).to_le_bytes(), password]);
        }
        let sector_no = ((crc32(password) as u64) << 32) | crc32(salt) as u64;
        state.encrypt_array(&mut out, sector_no);
        Ok(out)
    }

    pub fn encrypt_sector(&self, sector: &mut Sector, sector_no: u64) {
        let mut words = sector.words();
        self.encrypt_array(&mut words, sector_no);
        sector.set_words(&words);
    }

    pub fn decrypt_sector(&self, sector: &mut Sector, sector_no: u64) {
        let mut words = sector.words();
        self.decrypt_array(&mut words, sector_no);
        sector.set_words(&words);
    }

    pub fn encrypt_array(&self, words: &mut [u32], index: u64) {
        let key = self.sector_key(index);
        let n = words.len();

        let mut prev = (mix64(key) >> 32) as u32;
        for (i, word) in words.iter_mut().enumerate() {
            let ks = keystream(key, i);
            let x = (*word ^ self.sector0[i % SECTOR_WORDS] ^ ks as u32).wrapping_add(prev);
            *word = self.substitute(x);
            prev = *word;
        }

        let mut prev = (keystream(key, n) >> 32) as u32;
        for i in (0..n).rev() {
            let ks = keystream(key, i);
            let x = (words[i] ^ (ks >> 32) as u32).wrapping_add(prev.rotate_left(7));
            words[i] = self.substitute(x);
            prev = words[i];
        }
    }

    pub fn decrypt_array(&self, words: &mut [u32], index: u64) {
        let key = self.sector_key(index);
        let n = words.len();

        let mut prev = (keystream(key, n) >> 32) as u32;
        for i in (0..n).rev() {
            let c = words[i];
            let ks = keystream(key, i);
            words[i] = self.invert(c).wrapping_sub(prev.rotate_left(7)) ^ (ks >> 32) as u32;
            prev = c;
        }

        let mut prev = (mix64(key) >> 32) as u32;
        for (i, word) in words.iter_mut().enumerate() {
            let c = *word;
            let ks = keystream(key, i);
            *word = self.invert(c).wrapping_sub(prev) ^ self.sector0[i % SECTOR_WORDS] ^ ks as u32;
            prev = c;
        }
    }

    /// Encrypts consecutive 32-byte fields, field `k` at index `first + k`.
    pub fn encrypt_fields(&self, data: &mut [u8], first: u64) -> Result<()> {
        self.apply_fields(data, first, Self::encrypt_array)
    }

    pub fn decrypt_fields(&self, data: &mut [u8], first: u64) -> Result<()> {
        self.apply_fields(data, first, Self::decrypt_array)
    }

    fn apply_fields(
        &self,
        data: &mut [u8],
        first: u64,
        op: fn(&Self, &mut [u32], u64),
    ) -> Result<()> {
        if data.is_empty() || data.len() % FIELD_SIZE != 0 {
            return Err(CryptoError::InvalidInput(format!(
                "field data must be a positive multiple of {FIELD_SIZE} bytes, got {}",
                data.len()
            )));
        }
        for (k, field) in data.chunks_exact_mut(FIELD_SIZE).enumerate() {
            let mut words = [0u32; FIELD_WORDS];
            for (word, chunk) in words.iter_mut().zip(field.chunks_exact(4)) {
                *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            op(self, &mut words, first.wrapping_add(k as u64));
            for (chunk, word) in field.chunks_exact_mut(4).zip(&words) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }
        Ok(())
    }

    fn sector_key(&self, sector_no: u64) -> u64 {
        self.schedule[1]
            ^ sector_no.wrapping_mul(SECTOR_MUL)
            ^ self.schedule[3].rotate_left((sector_no & 63) as u32)
    }

    fn substitute(&self, x: u32) -> u32 {
        let a = self.table[(x & 0xffff) as usize];
        let b = self.table[((x >> 16) as u16 ^ a) as usize];
        (((b as u32) << 16) | a as u32).rotate_left(5)
    }

    fn invert(&self, y: u32) -> u32 {
        let y = y.rotate_right(5);
        let a = y as u16;
        let b = (y >> 16) as u16;
        let lo = self.inverse[a as usize];
        let hi = self.inverse[b as usize] ^ a;
        ((hi as u32) << 16) | lo as u32
    }
}

/// Folds a sector into a [`PWDLEN`]-character password: the sector is cut
/// into 8 equal segments and each segment's CRC32 is written as 8
/// upper-case hex digits.
pub fn sector_to_password(sector: &[u32; SECTOR_WORDS]) -> Zeroizing<String> {
    const SEGMENTS: usize = PWDLEN / 8;
    let mut bytes = Zeroizing::new([0u8; SECTOR_SIZE]);
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(sector) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    let mut password = Zeroizing::new(String::with_capacity(PWDLEN));
    for segment in bytes.chunks_exact(SECTOR_SIZE / SEGMENTS) {
        password.push_str(&format!("{:08X}", crc32(segment)));
    }
    password
}

/// Byte stream derived from a seed string by encrypting counter sectors.
///
/// Used to turn a user-supplied random string into key-generation entropy.
pub struct SeedStream {
    cipher: CipherState,
    counter: u64,
    block: [u8; SECTOR_SIZE],
    pos: usize,
}

impl Drop for SeedStream {
    fn drop(&mut self) {
        self.block.zeroize();
    }
}

impl SeedStream {
    pub fn new(seed: &[u8]) -> Result<Self> {
        let mut cipher = CipherState::with_password(seed)?;
        let mut table = CipherState::derive_sector(seed, SEED_STREAM_SALT)?;
        cipher.set_sector0(&table);
        table.zeroize();
        Ok(Self {
            cipher,
            counter: 0,
            block: [0; SECTOR_SIZE],
            pos: SECTOR_SIZE,
        })
    }

    fn refill(&mut self) {
        let mut words = [0u32; SECTOR_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = (self.counter as u32) ^ (i as u32).wrapping_mul(0x9E37_79B9) ^ (self.counter >> 32) as u32;
        }
        self.cipher.encrypt_array(&mut words, self.counter);
        for (chunk, word) in self.block.chunks_exact_mut(4).zip(&words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.counter += 1;
        self.pos = 0;
    }
}

impl RngCore for SeedStream {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut written = 0;
        while written < dest.len() {
            if self.pos == SECTOR_SIZE {
                self.refill();
            }
            let n = (dest.len() - written).min(SECTOR_SIZE - self.pos);
            dest[written..written + n].copy_from_slice(&self.block[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
