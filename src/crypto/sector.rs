//! The 512-byte sector and its word/header views.
//!
//! A sector is stored once, as bytes. Word and header views are explicit
//! little-endian conversions, never reinterpretations of the same memory.

use super::checksum::crc32;
use super::{SECTOR_SIZE, SECTOR_WORDS};
use crate::error::{CryptoError, Result};

/// Length of the packet header at the start of a sector.
pub const HEADER_LEN: usize = 8;
const CRC_OFFSET: usize = 4;

#[derive(Clone, PartialEq, Eq)]
pub struct Sector {
    bytes: [u8; SECTOR_SIZE],
}

impl Default for Sector {
    fn default() -> Self {
        Self {
            bytes: [0u8; SECTOR_SIZE],
        }
    }
}

impl std::fmt::Debug for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sector")
            .field("header", &self.header())
            .field("crc32", &format_args!("{:08x}", crc32(&self.bytes)))
            .finish()
    }
}

impl Sector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: [u8; SECTOR_SIZE]) -> Self {
        Self { bytes }
    }

    /// Copies a sector out of a slice, which must be exactly 512 bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let bytes: [u8; SECTOR_SIZE] = data.try_into().map_err(|_| {
            CryptoError::InvalidInput(format!("sector must be {SECTOR_SIZE} bytes, got {}", data.len()))
        })?;
        Ok(Self { bytes })
    }

    pub fn from_words(words: &[u32; SECTOR_WORDS]) -> Self {
        let mut sector = Self::default();
        sector.set_words(words);
        sector
    }

    pub fn as_bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; SECTOR_SIZE] {
        &mut self.bytes
    }

    pub fn into_bytes(self) -> [u8; SECTOR_SIZE] {
        self.bytes
    }

    pub fn words(&self) -> [u32; SECTOR_WORDS] {
        let mut words = [0u32; SECTOR_WORDS];
        for (word, chunk) in words.iter_mut().zip(self.bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        words
    }

    pub fn set_words(&mut self, words: &[u32; SECTOR_WORDS]) {
        for (chunk, word) in self.bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn header(&self) -> PacketHeader {
        PacketHeader::from_bytes(&self.bytes[..HEADER_LEN])
    }

    pub fn set_header(&mut self, header: &PacketHeader) {
        self.bytes[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    }

    /// CRC32 of the sector with the header's crc field taken as zero.
    pub fn compute_checksum(&self) -> u32 {
        let mut copy = self.bytes;
        copy[CRC_OFFSET..HEADER_LEN].fill(0);
        crc32(&copy)
    }

    /// Stores [`compute_checksum`](Self::compute_checksum) in the header.
    pub fn stamp_checksum(&mut self) {
        let crc = self.compute_checksum();
        self.bytes[CRC_OFFSET..HEADER_LEN].copy_from_slice(&crc.to_le_bytes());
    }

    pub fn checksum_ok(&self) -> bool {
        self.header().crc32 == self.compute_checksum()
    }
}

/// Header carried in the first 8 bytes of a network sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: u8,
    pub ttl: u8,
    pub length: u16,
    pub crc32: u32,
}

impl PacketHeader {
    fn from_bytes(data: &[u8]) -> Self {
        Self {
            kind: data[0],
            ttl: data[1],
            length: u16::from_le_bytes([data[2], data[3]]),
            crc32: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        }
    }

    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind;
        buf[1] = self.ttl;
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.crc32.to_le_bytes());
        buf
    }
}
