//! [C6] Crypto-store: marries the persistent store (C2), the crypto
//! pipeline (C3) and object framing (C4) behind `load_decrypt`/
//! `encrypt_save`, plus the three-tier key lookup spec.md §4.6 describes.

use crate::crypto::{self, CryptoKey, Iv};
use crate::error::Result;
use crate::geometry::{phys_lba_offset, Lba, KB};
use crate::store::PersistentStore;
use crate::types::agroupmap::AgroupMap;
use crate::types::superblock::Superblock;
use crate::types::uspacemap::UspaceMap;

/// Physical, on-disk byte length of a `logical_len`-byte plaintext block
/// once AES-GCM tags every `K`-sized cell.
fn physical_len(logical_len: usize) -> usize {
    let ncells = logical_len as u64 / KB;
    debug_assert_eq!(ncells * KB, logical_len as u64);
    (ncells * (KB + 16)) as usize
}

/// Owns the single scratch buffer `encrypt_save` stages ciphertext into.
/// Per spec.md §4.6/§5, this buffer is never shared across concurrent
/// commits — enforced here by requiring `&mut self`.
pub struct CryptoStore {
    scratch: Vec<u8>,
}

impl CryptoStore {
    pub fn new() -> Self {
        CryptoStore { scratch: Vec::new() }
    }

    /// Reads the block at physical offset `off` through the persistent
    /// store and decrypts it into a `logical_len`-byte plaintext buffer.
    /// The caller verifies individual views afterwards via `framing`.
    pub fn load_decrypt(
        &mut self,
        store: &mut PersistentStore,
        off: u64,
        iv: &Iv,
        key: &CryptoKey,
        logical_len: usize,
    ) -> Result<Vec<u8>> {
        let mut ciphertext = vec![0u8; physical_len(logical_len)];
        store.read(off, &mut ciphertext)?;
        crypto::decrypt_block(iv, key, &ciphertext)
    }

    /// Encrypts `block` into the scratch buffer and writes it through
    /// the persistent store at physical offset `off`.
    pub fn encrypt_save(
        &mut self,
        store: &mut PersistentStore,
        off: u64,
        iv: &Iv,
        key: &CryptoKey,
        block: &[u8],
    ) -> Result<()> {
        self.scratch = crypto::encrypt_block(iv, key, block)?;
        store.write(off, &self.scratch)
    }

    /// Physical offset and plaintext size of logical block `lba`.
    pub fn block_location(lba: Lba, logical_len: usize) -> (u64, usize) {
        (phys_lba_offset(lba), logical_len)
    }
}

impl Default for CryptoStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Three-tier key lookup (spec.md §4.6):
/// data/metadata block → agroup-map bkref; agroup-map block → uspace-map
/// per-AG slot; uspace-map block → super-block per-uspace slot;
/// super-block → KDF from passphrase+salt.
pub mod key_lookup {
    use super::*;

    pub fn for_data_block(am: &AgroupMap, bkref_slot: usize) -> (Iv, CryptoKey) {
        let bkref = am.bkref(bkref_slot);
        (bkref.iv(), bkref.key())
    }

    pub fn for_agroup_map(usp: &UspaceMap, ag_slot: usize) -> (Iv, CryptoKey) {
        usp.ag_key(ag_slot)
    }

    pub fn for_uspace_map(sb: &Superblock, usp_index: crate::geometry::UspIndex) -> (Iv, CryptoKey) {
        sb.uspace_key(usp_index)
    }

    pub fn for_super_block(passphrase: &[u8], salt: &[u8]) -> Result<(Iv, CryptoKey)> {
        crypto::kdf(passphrase, salt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VOLUME_SIZE_MIN;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A unique scratch path under the system temp dir, removed on drop.
    /// Avoids pulling in a dedicated tempfile crate for one test fixture.
    struct ScratchPath(std::path::PathBuf);

    impl ScratchPath {
        fn new() -> Self {
            static COUNTER: AtomicU32 = AtomicU32::new(0);
            let n = COUNTER.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir()
                .join(format!("voluta-cryptostore-test-{}-{}.img", std::process::id(), n));
            ScratchPath(path)
        }
    }

    impl Drop for ScratchPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    #[test]
    fn encrypt_then_load_decrypt_roundtrips() {
        let scratch = ScratchPath::new();
        let mut store = PersistentStore::create(&scratch.0, VOLUME_SIZE_MIN).unwrap();
        let mut cs = CryptoStore::new();
        let iv = crypto::random_iv();
        let key = crypto::random_key();
        let plaintext = vec![0x5Au8; crate::geometry::BK_SIZE as usize];

        cs.encrypt_save(&mut store, 0, &iv, &key, &plaintext).unwrap();
        let out = cs
            .load_decrypt(&mut store, 0, &iv, &key, plaintext.len())
            .unwrap();
        assert_eq!(out, plaintext);
    }
}
