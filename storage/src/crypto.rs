//! [C3] Crypto pipeline: KDF, AES-256-GCM block cipher, digests, CRC32,
//! and entropy (spec.md §4.3).
//!
//! The teacher repo already depends on `rand_core` for `OsRng` (see
//! `utils/src/user.rs`); we reuse it here for key/IV/passphrase
//! generation. `argon2` (also a teacher dependency, used there for
//! *account* password hashing) does not fit the volume KDF spec.md §4.3
//! asks for — PBKDF2-SHA256 + scrypt — so it is dropped (see DESIGN.md).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};

use crate::error::{Error, Result};
use crate::geometry::{CELLS_PER_BK, KB};

/// Fixed PBKDF2 iteration count (spec.md §4.3: "fixed iteration count").
const KDF_PBKDF2_ITERATIONS: u32 = 200_000;
/// scrypt cost parameters (log2(N), r, p) — conservative, fixed values.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

pub const IV_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Iv(pub [u8; IV_LEN]);

#[derive(Clone)]
pub struct CryptoKey(pub [u8; KEY_LEN]);

impl std::fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CryptoKey(..)")
    }
}

/// `kdf(passphrase, salt) -> (iv, key)`: SHA-512 the salt, then
/// PBKDF2-SHA256 for the IV and scrypt for the key (spec.md §4.3).
pub fn kdf(passphrase: &[u8], salt: &[u8]) -> Result<(Iv, CryptoKey)> {
    let salted = sha512(salt);

    let mut iv = [0u8; IV_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, &salted, KDF_PBKDF2_ITERATIONS, &mut iv);

    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|e| Error::CryptoFailure(format!("scrypt params: {e}")))?;
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(passphrase, &salted, &params, &mut key)
        .map_err(|e| Error::CryptoFailure(format!("scrypt: {e}")))?;

    Ok((Iv(iv), CryptoKey(key)))
}

fn cipher_for(key: &CryptoKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0))
}

/// Derives a per-cell nonce from the block IV and the cell index within
/// the block, so each `K`-sized sub-buffer is enciphered under a
/// distinct nonce while the cipher is keyed/IV'd once per block (spec.md
/// §4.3).
fn cell_nonce(iv: &Iv, cell_index: u64) -> Nonce {
    let mut n = iv.0;
    let mix = cell_index.to_le_bytes();
    for i in 0..8.min(IV_LEN) {
        n[i] ^= mix[i];
    }
    *Nonce::from_slice(&n)
}

/// `encrypt_block(iv, key, in) -> out`: AES-256-GCM applied
/// independently to each `K`-sized sub-buffer inside the block.
pub fn encrypt_block(iv: &Iv, key: &CryptoKey, block: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key);
    let ncells = block.len() as u64 / KB;
    debug_assert_eq!(block.len() as u64, ncells * KB);
    let mut out = Vec::with_capacity(block.len() + ncells as usize * 16);
    for i in 0..ncells {
        let cell = &block[(i * KB) as usize..((i + 1) * KB) as usize];
        let nonce = cell_nonce(iv, i);
        let ct = cipher
            .encrypt(&nonce, Payload { msg: cell, aad: &[] })
            .map_err(|_| Error::CryptoFailure("AES-GCM encrypt failed".into()))?;
        out.extend_from_slice(&ct);
    }
    Ok(out)
}

/// `decrypt_block(iv, key, in) -> out`: inverse of `encrypt_block`.
pub fn decrypt_block(iv: &Iv, key: &CryptoKey, block: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key);
    let tagged_cell = KB as usize + 16;
    if block.len() % tagged_cell != 0 {
        return Err(Error::corrupted("ciphertext block length is not cell-aligned"));
    }
    let ncells = block.len() / tagged_cell;
    let mut out = Vec::with_capacity(ncells * KB as usize);
    for i in 0..ncells {
        let ct = &block[i * tagged_cell..(i + 1) * tagged_cell];
        let nonce = cell_nonce(iv, i as u64);
        let pt = cipher
            .decrypt(&nonce, Payload { msg: ct, aad: &[] })
            .map_err(|_| Error::corrupted("AES-GCM authentication failed"))?;
        out.extend_from_slice(&pt);
    }
    Ok(out)
}

pub fn sha256(buf: &[u8]) -> [u8; 32] {
    Sha256::digest(buf).into()
}

/// A deterministic, volume-path-derived KDF salt (spec.md §6:
/// "Persisted state outside the volume: none" — the salt still needs
/// to come from *somewhere* before the super-block can be decrypted,
/// so rather than store it unencrypted in the volume or in a sidecar
/// file, every caller derives the same salt from the volume's
/// canonicalized path). Documented as an Open Question resolution in
/// DESIGN.md.
pub fn salt_for_volume(path: &std::path::Path) -> Vec<u8> {
    let canon = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    sha256(canon.to_string_lossy().as_bytes()).to_vec()
}

pub fn sha512(buf: &[u8]) -> [u8; 64] {
    Sha512::digest(buf).into()
}

pub fn crc32(buf: &[u8]) -> u32 {
    crc32fast::hash(buf)
}

/// Fills `out` with cryptographically secure entropy.
pub fn random_bytes(out: &mut [u8]) {
    OsRng.fill_bytes(out);
}

pub fn random_iv() -> Iv {
    let mut b = [0u8; IV_LEN];
    random_bytes(&mut b);
    Iv(b)
}

pub fn random_key() -> CryptoKey {
    let mut b = [0u8; KEY_LEN];
    random_bytes(&mut b);
    CryptoKey(b)
}

/// A random ASCII passphrase of `len` printable characters (used for
/// tests and format-time defaults).
pub fn random_ascii_passphrase(len: usize) -> String {
    const ALPHABET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut raw = vec![0u8; len];
    random_bytes(&mut raw);
    raw.iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kdf_is_deterministic_for_same_inputs() {
        let (iv1, key1) = kdf(b"pw", b"s").unwrap();
        let (iv2, key2) = kdf(b"pw", b"s").unwrap();
        assert_eq!(iv1, iv2);
        assert_eq!(key1.0, key2.0);
    }

    #[test]
    fn kdf_differs_across_passphrases() {
        let (iv1, key1) = kdf(b"pw1", b"s").unwrap();
        let (iv2, key2) = kdf(b"pw2", b"s").unwrap();
        assert_ne!((iv1, key1.0), (iv2, key2.0));
    }

    #[test]
    fn block_roundtrip() {
        let key = random_key();
        let iv = random_iv();
        let block = vec![0xABu8; CELLS_PER_BK as usize * KB as usize];
        let ct = encrypt_block(&iv, &key, &block).unwrap();
        let pt = decrypt_block(&iv, &key, &ct).unwrap();
        assert_eq!(pt, block);
    }

    #[test]
    fn tampered_ciphertext_fails_to_decrypt() {
        let key = random_key();
        let iv = random_iv();
        let block = vec![0x11u8; CELLS_PER_BK as usize * KB as usize];
        let mut ct = encrypt_block(&iv, &key, &block).unwrap();
        ct[17] ^= 0xFF;
        assert!(decrypt_block(&iv, &key, &ct).is_err());
    }
}
