use std::fs;
use std::sync::Arc;
use std::thread;

use dnet_crypto::format::{self, KeyFile};
use dnet_crypto::{CipherState, CryptoConfig, CryptoError, KeySlot, KeyVault, VaultState};
use tempfile::tempdir;

fn config() -> CryptoConfig {
    CryptoConfig::new(512, 1, None).unwrap()
}

#[test]
fn key_file_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dnet_key.dat");

    let vault = KeyVault::with_config(config());
    let blob = vault.create("node password", "mash the keyboard").unwrap();
    fs::write(&path, &blob[..]).unwrap();

    let stored = fs::read(&path).unwrap();
    assert!(matches!(format::parse(&stored).unwrap(), KeyFile::Keys(_)));

    let restarted = KeyVault::with_config(config());
    restarted.open("node password", &stored).unwrap();
    assert_eq!(restarted.state(), VaultState::Verified);
    assert_eq!(restarted.key_bytes(), vault.key_bytes());
    assert_eq!(restarted.detect_key_length(KeySlot::Public), 32);
}

#[test]
fn wrong_password_reports_verification_failure() {
    let vault = KeyVault::with_config(config());
    let blob = vault.create("right", "entropy").unwrap();

    let other = KeyVault::with_config(config());
    match other.open("wrong", &blob) {
        Err(CryptoError::KeyVerification(step)) => {
            assert!((1..=6).contains(&step.code()));
        }
        result => panic!("expected KeyVerification, got {result:?}"),
    }
    assert_ne!(other.state(), VaultState::Verified);
}

#[test]
fn manual_wrap_cycle_matches_export() {
    let vault = KeyVault::with_config(config());
    vault.generate_seeded(512, "manual").unwrap();
    vault.set_user_password("pw").unwrap();
    let exported = vault.export_wrapped().unwrap();

    let cipher = CipherState::for_user_password("pw").unwrap();
    vault.wrap(&cipher).unwrap();
    assert_eq!(vault.key_bytes(), exported);

    vault.unwrap(&cipher).unwrap();
    vault.verify().unwrap();
}

#[test]
fn wallet_keys_are_bound_to_the_password() {
    let a = KeyVault::new();
    a.set_user_password("alpha").unwrap();
    let b = KeyVault::new();
    b.set_user_password("beta").unwrap();

    let secret = *b"0123456789abcdef0123456789abcdef";
    let sealed = a.encrypt_wallet_key(&secret, 2).unwrap();
    assert_eq!(a.decrypt_wallet_key(&sealed, 2).unwrap(), secret);
    assert_ne!(b.decrypt_wallet_key(&sealed, 2).unwrap(), secret);
    assert_ne!(a.decrypt_wallet_key(&sealed, 3).unwrap(), secret);
}

#[test]
fn readers_run_while_keys_are_replaced() {
    let vault = Arc::new(KeyVault::with_config(CryptoConfig::new(256, 1, None).unwrap()));
    vault.generate_seeded(256, "first").unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || {
                for _ in 0..5 {
                    // keys may change between calls, so only the cached length is checked
                    let mut words = vault.random_words().unwrap();
                    let _ = vault.transform(KeySlot::Private, &mut words);
                    assert_eq!(vault.detect_key_length(KeySlot::Private), 16);
                }
            })
        })
        .collect();

    for seed in ["second", "third"] {
        vault.generate_seeded(256, seed).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    vault.verify().unwrap();
}

#[test]
fn open_races_generation_without_mixing_state() {
    let small = || CryptoConfig::new(256, 1, None).unwrap();
    let blob = KeyVault::with_config(small()).create("stored", "on disk").unwrap();
    let opened = {
        let vault = KeyVault::with_config(small());
        vault.open("stored", &blob).unwrap();
        vault.key_bytes()
    };
    let seeds = ["racer-0", "racer-1", "racer-2"];
    let generated: Vec<_> = seeds
        .iter()
        .map(|seed| {
            let vault = KeyVault::with_config(small());
            vault.generate_seeded(256, seed).unwrap();
            vault.key_bytes()
        })
        .collect();

    let vault = Arc::new(KeyVault::with_config(small()));
    vault.generate_seeded(256, seeds[0]).unwrap();

    let openers: Vec<_> = (0..3)
        .map(|i| {
            let (vault, blob) = (Arc::clone(&vault), blob.clone());
            thread::spawn(move || {
                for _ in 0..3 {
                    if i == 0 {
                        // a rejected open must leave whatever is installed alone
                        assert!(vault.open("not the password", &blob).is_err());
                    } else {
                        vault.open("stored", &blob).unwrap();
                    }
                }
            })
        })
        .collect();

    for seed in seeds {
        vault.generate_seeded(256, seed).unwrap();
    }
    for opener in openers {
        opener.join().unwrap();
    }

    let keys = vault.key_bytes();
    assert!(keys == opened || generated.contains(&keys));
    vault.verify().unwrap();
    assert_eq!(vault.detect_key_length(KeySlot::Private), 16);
}
