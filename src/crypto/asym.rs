//! dnet asymmetric keys.
//!
//! A key of length `L` digits stores a modulus in digits `[0, L/2)` and an
//! exponent in `[L/2, L)`, little-endian. The private and public keys share
//! the modulus, so applying one after the other is the identity for every
//! block below the modulus, in either order.
//!
//! Keys are generated at a smaller strength and then tiled across the fixed
//! [`DNET_KEYLEN`](super::DNET_KEYLEN) slot. [`detect_key_length`] recovers
//! the effective length from the repetition.

use std::sync::OnceLock;

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{DNET_KEY_SIZE, KEYLEN_FLOOR};
use crate::error::{CryptoError, Result};

/// One limb of key material.
pub type Digit = u32;

pub const PUBLIC_EXPONENT: u32 = 65_537;
/// Smallest supported modulus size in bits.
pub const MIN_KEY_BITS: usize = 256;

const SIEVE_LIMIT: u32 = 2048;
const SCAN_WINDOW: u32 = 1 << 20;

/// Digits needed for a key whose modulus has `bits` bits.
pub fn key_len_for_bits(bits: usize) -> Result<usize> {
    if !bits.is_power_of_two() || !(MIN_KEY_BITS..=DNET_KEY_SIZE).contains(&bits) {
        return Err(CryptoError::InvalidInput(format!(
            "key size must be a power of two between {MIN_KEY_BITS} and {DNET_KEY_SIZE} bits, got {bits}"
        )));
    }
    Ok(bits * 2 / Digit::BITS as usize)
}

/// Freshly generated key pair at its effective length (not yet tiled).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AsymmetricKeyPair {
    private: Vec<Digit>,
    public: Vec<Digit>,
}

impl std::fmt::Debug for AsymmetricKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsymmetricKeyPair")
            .field("key_len", &self.key_len())
            .finish_non_exhaustive()
    }
}

impl AsymmetricKeyPair {
    pub fn private(&self) -> &[Digit] {
        &self.private
    }

    pub fn public(&self) -> &[Digit] {
        &self.public
    }

    pub fn key_len(&self) -> usize {
        self.public.len()
    }

    /// Writes both keys tiled across the full-length buffers.
    pub fn tile_into(&self, private: &mut [Digit], public: &mut [Digit]) {
        let len = self.key_len();
        private[..len].copy_from_slice(&self.private);
        public[..len].copy_from_slice(&self.public);
        tile_key(private, len);
        tile_key(public, len);
    }
}

/// Generates a key pair whose modulus has exactly `bits` bits.
pub fn generate_keypair<R: RngCore + ?Sized>(bits: usize, rng: &mut R) -> Result<AsymmetricKeyPair> {
    let key_len = key_len_for_bits(bits)?;
    let modlen = key_len / 2;
    let half = bits as u64 / 2;
    let e = BigUint::from(PUBLIC_EXPONENT);

    loop {
        let p = random_prime(half, rng);
        let q = random_prime(half, rng);
        if p == q {
            continue;
        }
        let n = &p * &q;
        if n.bits() != bits as u64 {
            continue;
        }
        let phi = (&p - 1u32) * (&q - 1u32);
        let Some(d) = e.modinv(&phi) else {
            continue;
        };

        let mut private = vec![0; key_len];
        let mut public = vec![0; key_len];
        write_digits(&n, &mut private[..modlen]);
        write_digits(&d, &mut private[modlen..]);
        write_digits(&n, &mut public[..modlen]);
        write_digits(&e, &mut public[modlen..]);
        return Ok(AsymmetricKeyPair { private, public });
    }
}

/// Applies `key[..key_len]` to `buf` in place, one `key_len / 2`-digit block
/// at a time. Every check runs before the buffer is touched.
pub fn transform(buf: &mut [Digit], key: &[Digit], key_len: usize) -> Result<()> {
    if key_len < 2 || key_len % 2 != 0 || key_len > key.len() {
        return Err(CryptoError::DegenerateKey("key length must be even and fit the key buffer"));
    }
    let modlen = key_len / 2;
    if buf.len() % modlen != 0 {
        return Err(CryptoError::InvalidInput(format!(
            "buffer of {} digits is not a multiple of the {modlen}-digit block",
            buf.len()
        )));
    }

    let modulus = BigUint::from_slice(&key[..modlen]);
    let exponent = BigUint::from_slice(&key[modlen..key_len]);
    if modulus <= BigUint::one() {
        return Err(CryptoError::DegenerateKey("modulus below 2"));
    }
    if exponent.is_zero() {
        return Err(CryptoError::DegenerateKey("zero exponent"));
    }

    let blocks: Vec<BigUint> = buf.chunks_exact(modlen).map(BigUint::from_slice).collect();
    if let Some(block) = blocks.iter().position(|b| *b >= modulus) {
        return Err(CryptoError::TransformUndefined { block });
    }
    for (chunk, block) in buf.chunks_exact_mut(modlen).zip(blocks) {
        write_digits(&block.modpow(&exponent, &modulus), chunk);
    }
    Ok(())
}

/// Halves `max_len` while the first half of the key equals the second,
/// never going below [`KEYLEN_FLOOR`].
pub fn detect_key_length(key: &[Digit], max_len: usize) -> usize {
    let mut len = max_len.min(key.len());
    while len > KEYLEN_FLOOR && len % 2 == 0 {
        let half = len / 2;
        if key[..half] != key[half..len] {
            break;
        }
        len = half;
    }
    len
}

/// Repeats the first `effective_len` digits over the rest of `key`.
pub fn tile_key(key: &mut [Digit], effective_len: usize) {
    if effective_len == 0 {
        return;
    }
    let mut filled = effective_len.min(key.len());
    while filled < key.len() {
        let n = filled.min(key.len() - filled);
        key.copy_within(0..n, filled);
        filled += n;
    }
}

fn write_digits(value: &BigUint, out: &mut [Digit]) {
    let digits = Zeroizing::new(value.to_u32_digits());
    out.fill(0);
    out[..digits.len()].copy_from_slice(&digits);
}

fn small_primes() -> &'static [u32] {
    static PRIMES: OnceLock<Vec<u32>> = OnceLock::new();
    PRIMES.get_or_init(|| {
        let mut composite = vec![false; SIEVE_LIMIT as usize];
        let mut primes = Vec::new();
        for i in (3..SIEVE_LIMIT as usize).step_by(2) {
            if composite[i] {
                continue;
            }
            primes.push(i as u32);
            for j in (i * i..SIEVE_LIMIT as usize).step_by(2 * i) {
                composite[j] = true;
            }
        }
        primes
    })
}

fn rem_small(n: &BigUint, p: u32) -> u32 {
    n.to_u32_digits()
        .iter()
        .rev()
        .fold(0u64, |r, &d| ((r << 32) | d as u64) % p as u64) as u32
}

fn mr_rounds(bits: u64) -> usize {
    if bits >= 1024 {
        4
    } else if bits >= 512 {
        7
    } else {
        12
    }
}

fn random_prime<R: RngCore + ?Sized>(bits: u64, rng: &mut R) -> BigUint {
    let primes = small_primes();
    loop {
        let mut base = rng.gen_biguint(bits);
        base.set_bit(bits - 1, true);
        base.set_bit(bits - 2, true);
        base.set_bit(0, true);

        let residues: Vec<u32> = primes.iter().map(|&p| rem_small(&base, p)).collect();
        let mut delta = 0u32;
        while delta < SCAN_WINDOW {
            let sieved = residues
                .iter()
                .zip(primes)
                .all(|(&r, &p)| (r + delta) % p != 0);
            if sieved {
                let candidate = &base + delta;
                if candidate.bits() != bits {
                    break;
                }
                if is_probable_prime(&candidate, mr_rounds(bits), rng) {
                    return candidate;
                }
            }
            delta += 2;
        }
    }
}

/// Miller-Rabin with random bases.
fn is_probable_prime<R: RngCore + ?Sized>(n: &BigUint, rounds: usize, rng: &mut R) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    if *n < two {
        return false;
    }
    if *n == two || *n == BigUint::from(3u32) {
        return true;
    }
    if !n.bit(0) {
        return false;
    }

    let n_minus_one = n - &one;
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
            if x == one {
                return false;
            }
        }
        return false;
    }
    true
}
