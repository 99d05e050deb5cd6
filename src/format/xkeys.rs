//! The node's `xkeys` blob: a key pair plus the sector-0 material of the
//! peer protocol cipher.

use anyhow::{Context, Result, bail};

use crate::crypto::{CipherState, KEYS_BLOB_LEN, SECTOR_SIZE, SECTOR_WORDS, Sector};
use crate::keys::KeyPair;

pub const XKEYS_BLOB_LEN: usize = KEYS_BLOB_LEN + 2 * SECTOR_SIZE;

const ENCODED_OFFSET: usize = KEYS_BLOB_LEN;
const SECT0_OFFSET: usize = KEYS_BLOB_LEN + SECTOR_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XKeys {
    keys: KeyPair,
    sect0_encoded: Sector,
    sect0: [u32; SECTOR_WORDS],
}

impl XKeys {
    pub fn new(keys: KeyPair, sect0_encoded: Sector, sect0: [u32; SECTOR_WORDS]) -> Self {
        Self {
            keys,
            sect0_encoded,
            sect0,
        }
    }

    pub fn keys(&self) -> &KeyPair {
        &self.keys
    }

    /// Payload a node sends as-is when it opens a peer connection.
    pub fn handshake_sector(&self) -> &Sector {
        &self.sect0_encoded
    }

    pub fn sect0(&self) -> &[u32; SECTOR_WORDS] {
        &self.sect0
    }

    /// Protocol cipher keyed by `sect0`.
    pub fn cipher(&self) -> crate::error::Result<CipherState> {
        CipherState::from_sector0(&self.sect0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(XKEYS_BLOB_LEN);
        buf.extend_from_slice(&self.keys.to_bytes());
        buf.extend_from_slice(self.sect0_encoded.as_bytes());
        buf.extend_from_slice(Sector::from_words(&self.sect0).as_bytes());
        buf
    }
}

/// Parses an xkeys blob.
///
/// # Errors
///
/// Returns an error if the blob is not exactly [`XKEYS_BLOB_LEN`] bytes.
pub fn parse(data: &[u8]) -> Result<XKeys> {
    if data.len() != XKEYS_BLOB_LEN {
        bail!("xkeys blob must be {XKEYS_BLOB_LEN} bytes, got {}", data.len());
    }

    let keys = KeyPair::from_bytes(&data[..ENCODED_OFFSET]).context("invalid key section")?;
    let sect0_encoded = Sector::from_slice(&data[ENCODED_OFFSET..SECT0_OFFSET])?;
    let sect0 = Sector::from_slice(&data[SECT0_OFFSET..])?.words();

    Ok(XKeys::new(keys, sect0_encoded, sect0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sector_to_password;

    fn sample() -> Vec<u8> {
        let mut data = vec![0u8; XKEYS_BLOB_LEN];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        data
    }

    #[test]
    fn sections_land_at_fixed_offsets() {
        let data = sample();
        let x = parse(&data).unwrap();
        assert_eq!(&x.keys().to_bytes()[..], &data[..2048]);
        assert_eq!(x.handshake_sector().as_bytes(), &data[2048..2560]);
        assert_eq!(Sector::from_words(x.sect0()).as_bytes(), &data[2560..]);
        assert_eq!(x.to_bytes(), data);
    }

    #[test]
    fn cipher_is_keyed_by_sect0() {
        let x = parse(&sample()).unwrap();
        let cipher = x.cipher().unwrap();
        assert_eq!(cipher.sector0(), x.sect0());

        let mut expected = CipherState::with_password(sector_to_password(x.sect0()).as_bytes()).unwrap();
        expected.set_sector0(x.sect0());

        let mut a = Sector::from_bytes([0x42; SECTOR_SIZE]);
        let mut b = a.clone();
        cipher.encrypt_sector(&mut a, 9);
        expected.encrypt_sector(&mut b, 9);
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_length_fails() {
        assert!(parse(&[0u8; 2048]).is_err());
        assert!(parse(&[0u8; 3071]).is_err());
    }
}
