//! Encryption of stored connection passwords.
//!
//! Passwords are sealed with ChaCha20-Poly1305 under a key derived from a
//! master password with Argon2. The sealed form is `base64(nonce || ciphertext)`.
//! Decryption is authenticated, so a wrong key or a tampered value yields
//! `None` rather than garbage.

use crate::DbError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use std::sync::RwLock;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

/// Generates a fresh random salt for key derivation.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

pub struct CryptoService {
    cipher: RwLock<Option<ChaCha20Poly1305>>,
}

impl CryptoService {
    /// Creates an uninitialized service. Nothing can be encrypted or
    /// decrypted until `initialize` succeeds.
    pub fn new() -> Self {
        Self {
            cipher: RwLock::new(None),
        }
    }

    pub fn initialize(&self, master_password: &str, salt: &[u8]) -> Result<(), DbError> {
        if master_password.is_empty() {
            return Err(DbError::Crypto("Master password is empty".to_string()));
        }

        let mut key = [0u8; KEY_LEN];
        argon2::Argon2::default()
            .hash_password_into(master_password.as_bytes(), salt, &mut key)
            .map_err(|e| DbError::Crypto(format!("Key derivation failed: {}", e)))?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        *self.cipher_write() = Some(cipher);

        log::info!("Crypto service initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.cipher_read().is_some()
    }

    /// Forgets the derived key.
    pub fn lock(&self) {
        *self.cipher_write() = None;
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, DbError> {
        let guard = self.cipher_read();
        let cipher = guard
            .as_ref()
            .ok_or_else(|| DbError::Crypto("Crypto service is not initialized".to_string()))?;

        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| DbError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, sealed: &str) -> Option<String> {
        let guard = self.cipher_read();
        let cipher = guard.as_ref()?;

        let bytes = STANDARD.decode(sealed.trim()).ok()?;
        if bytes.len() <= NONCE_LEN {
            return None;
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()?;

        String::from_utf8(plaintext).ok()
    }

    fn cipher_read(&self) -> std::sync::RwLockReadGuard<'_, Option<ChaCha20Poly1305>> {
        match self.cipher.read() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Crypto RwLock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    fn cipher_write(&self) -> std::sync::RwLockWriteGuard<'_, Option<ChaCha20Poly1305>> {
        match self.cipher.write() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Crypto RwLock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }
}

impl Default for CryptoService {
    fn default() -> Self {
        Self::new()
    }
}
