//! On-disk key blob formats.
//!
//! Two fixed-size layouts exist and the length alone identifies them:
//!
//! ```text
//! dnet_key.dat  PRIVATE (1024) | PUBLIC (1024)
//! xkeys         PRIVATE (1024) | PUBLIC (1024) | SECT0_ENCODED (512) | SECT0 (512)
//! ```

use anyhow::{Context, Result, bail};

use crate::crypto::KEYS_BLOB_LEN;
use crate::keys::KeyPair;

pub mod xkeys;

pub use xkeys::{XKEYS_BLOB_LEN, XKeys};

/// A parsed key blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFile {
    Keys(KeyPair),
    XKeys(XKeys),
}

/// Parses a key blob, dispatching on its length.
///
/// # Errors
///
/// Returns an error if the length matches neither layout.
pub fn parse(data: &[u8]) -> Result<KeyFile> {
    match data.len() {
        KEYS_BLOB_LEN => Ok(KeyFile::Keys(
            KeyPair::from_bytes(data).context("failed to parse key pair blob")?,
        )),
        XKEYS_BLOB_LEN => Ok(KeyFile::XKeys(xkeys::parse(data)?)),
        n => bail!("unrecognised key blob length {n}, expected {KEYS_BLOB_LEN} or {XKEYS_BLOB_LEN}"),
    }
}

/// Serializes a key blob back to its fixed layout.
pub fn serialize(file: &KeyFile) -> Vec<u8> {
    match file {
        KeyFile::Keys(keys) => keys.to_bytes().to_vec(),
        KeyFile::XKeys(x) => x.to_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_length() {
        let keys = vec![1u8; KEYS_BLOB_LEN];
        assert!(matches!(parse(&keys).unwrap(), KeyFile::Keys(_)));

        let xkeys = vec![2u8; XKEYS_BLOB_LEN];
        assert!(matches!(parse(&xkeys).unwrap(), KeyFile::XKeys(_)));
    }

    #[test]
    fn serialize_restores_bytes() {
        let mut data = vec![0u8; XKEYS_BLOB_LEN];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        let file = parse(&data).unwrap();
        assert_eq!(serialize(&file), data);

        let file = parse(&data[..KEYS_BLOB_LEN]).unwrap();
        assert_eq!(serialize(&file), &data[..KEYS_BLOB_LEN]);
    }

    #[test]
    fn other_lengths_fail() {
        for len in [0, 10, 2047, 2560, 3073] {
            assert!(parse(&vec![0u8; len]).is_err());
        }
    }
}
