pub mod config;
pub mod crypto;
mod error;
pub mod format;
mod keys;
pub mod pow;
mod random;
mod vault;

pub use crate::config::CryptoConfig;
pub use crate::crypto::{CipherState, Sector};
pub use crate::error::{CryptoError, Result, VerifyStep};
pub use crate::format::XKeys;
pub use crate::keys::{KeyPair, KeySlot};
pub use crate::random::{RANDOM_SEED_PASSWORD, SeedRandom, mask_sector};
pub use crate::vault::{KeyVault, VaultState};

use tracing::info;

/// Which link a sector travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// Node-to-node traffic, keyed by the node's xkeys.
    Peer,
    /// Pool-to-miner traffic, keyed by the shared miner password.
    Miner,
}

/// Everything a node needs for sector and key cryptography: the key vault
/// plus the peer and miner link ciphers. Each cipher is independent of the
/// others and of the vault's user cipher.
pub struct DnetCrypto {
    vault: KeyVault,
    miner: CipherState,
    peer: Option<CipherState>,
}

impl DnetCrypto {
    /// Sets up the miner cipher and an empty vault.
    pub fn init(config: CryptoConfig) -> Result<Self> {
        let miner = CipherState::for_miners()?;
        info!("dnet crypto initialised");
        Ok(Self {
            vault: KeyVault::with_config(config),
            miner,
            peer: None,
        })
    }

    /// Keys the peer link from the node's xkeys.
    pub fn set_peer_keys(&mut self, xkeys: &XKeys) -> Result<()> {
        self.peer = Some(xkeys.cipher()?);
        info!("peer link cipher installed");
        Ok(())
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    pub fn cipher(&self, link: Link) -> Result<&CipherState> {
        match link {
            Link::Miner => Ok(&self.miner),
            Link::Peer => self
                .peer
                .as_ref()
                .ok_or(CryptoError::InvalidState("peer keys not installed")),
        }
    }

    pub fn encrypt_sector(&self, link: Link, sector: &mut Sector, sector_no: u64) -> Result<()> {
        self.cipher(link)?.encrypt_sector(sector, sector_no);
        Ok(())
    }

    pub fn decrypt_sector(&self, link: Link, sector: &mut Sector, sector_no: u64) -> Result<()> {
        self.cipher(link)?.decrypt_sector(sector, sector_no);
        Ok(())
    }

    /// Encrypts 32-byte miner message fields numbered from `first`.
    pub fn encrypt_miner_fields(&self, data: &mut [u8], first: u64) -> Result<()> {
        self.miner.encrypt_fields(data, first)
    }

    pub fn decrypt_miner_fields(&self, data: &mut [u8], first: u64) -> Result<()> {
        self.miner.decrypt_fields(data, first)
    }
}
