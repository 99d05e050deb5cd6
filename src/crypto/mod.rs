//! Cryptographic primitives for dnet sectors and keys.
//!
//! Provides the sector cipher, the dnet asymmetric key engine and the
//! 512-byte sector representation they both operate on.

pub mod asym;
pub mod checksum;
pub mod cipher;
pub mod sector;

pub use asym::{AsymmetricKeyPair, Digit, detect_key_length, generate_keypair, tile_key, transform};
pub use cipher::{CipherState, SeedStream, sector_to_password};
pub use sector::{PacketHeader, Sector};

/// Log2 of the sector size.
pub const SECTOR_LOG: usize = 9;
/// Length of a sector (512 bytes).
pub const SECTOR_SIZE: usize = 1 << SECTOR_LOG;
/// Number of 32-bit words in a sector.
pub const SECTOR_WORDS: usize = SECTOR_SIZE / 4;
/// Length of a derived password string.
pub const PWDLEN: usize = 64;
/// Key family size, in modulus bits.
pub const DNET_KEY_SIZE: usize = 4096;
/// Digits in a full (tiled) key: modulus plus exponent.
pub const DNET_KEYLEN: usize = (DNET_KEY_SIZE * 2) / (std::mem::size_of::<Digit>() * 8);
/// Reference key length the random-sector masking stride is derived from.
pub const KEYLEN_MIN: usize = DNET_KEYLEN / 4;
/// Every `MASK_STRIDE`-th word of a random sector gets its top bit cleared.
pub const MASK_STRIDE: usize = KEYLEN_MIN / 8;
/// Smallest effective key length reported by [`detect_key_length`].
pub const KEYLEN_FLOOR: usize = 16;
/// Bytes in a key-pair blob (`private || public`).
pub const KEYS_BLOB_LEN: usize = 2 * DNET_KEYLEN * std::mem::size_of::<Digit>();
/// Sectors in a key-pair blob.
pub const KEYS_BLOB_SECTORS: usize = KEYS_BLOB_LEN / SECTOR_SIZE;
