// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! AES-256-GCM engine for object payloads.
//!
//! Every call draws a fresh 96-bit nonce from the system CSPRNG. The nonce
//! is handed to ring through a single-use sequence, so a sealing key built
//! here can seal exactly once.
//!
//! # Format
//!
//! ```text
//! ┌────────────┬─────────────────────────────┬───────────────┐
//! │ IV (12)    │ Ciphertext (= plaintext len) │ Tag (16)      │
//! └────────────┴─────────────────────────────┴───────────────┘
//!    kept as three separate fields of an EncryptedObject
//! ```

use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroize;

use crate::error::VaultError;
use crate::kms::{DataEncryptionKey, AES_GCM_NONCE_SIZE, AES_GCM_TAG_SIZE};

/// Nonce sequence that yields its nonce once and then refuses.
struct SingleUseNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleUseNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Output of a single AEAD encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Ciphertext, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Random 96-bit nonce.
    pub iv: [u8; AES_GCM_NONCE_SIZE],
    /// 128-bit authentication tag.
    pub tag: [u8; AES_GCM_TAG_SIZE],
}

/// Authenticated encryption with AES-256-GCM.
///
/// Stateless apart from the random source; share freely across tasks.
#[derive(Debug)]
pub struct AeadEngine {
    rng: SystemRandom,
}

impl Default for AeadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AeadEngine {
    /// Creates a new engine.
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Encrypts `plaintext` under `dek`, authenticating `aad` alongside.
    pub fn encrypt(
        &self,
        dek: &DataEncryptionKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<SealedPayload, VaultError> {
        let mut iv = [0u8; AES_GCM_NONCE_SIZE];
        self.rng
            .fill(&mut iv)
            .map_err(|_| VaultError::KeyGeneration("failed to generate nonce".into()))?;

        seal(dek.key(), iv, plaintext, aad)
    }

    /// Decrypts and verifies a payload produced by [`AeadEngine::encrypt`].
    ///
    /// Lengths of `iv` and `tag` are checked before any cryptographic work.
    /// On tag mismatch nothing but [`VaultError::AuthenticationFailure`] is
    /// returned and the working buffer is wiped.
    pub fn decrypt(
        &self,
        dek: &DataEncryptionKey,
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        open(dek.key(), ciphertext, iv, tag, aad)
    }
}

/// Seals with an explicit nonce. Only reachable from inside the crate so
/// that callers can never choose or repeat an IV.
pub(crate) fn seal(
    key: &[u8],
    iv: [u8; AES_GCM_NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedPayload, VaultError> {
    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key)?;
    let mut sealing_key = aead::SealingKey::new(unbound_key, SingleUseNonce(Some(iv)));

    let mut in_out = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(Aad::from(aad), &mut in_out)
        .map_err(|_| VaultError::KeyGeneration("AES-GCM seal failed".into()))?;

    let mut tag_bytes = [0u8; AES_GCM_TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_ref());

    Ok(SealedPayload {
        ciphertext: in_out,
        iv,
        tag: tag_bytes,
    })
}

/// Opens a sealed payload with the given raw key.
pub(crate) fn open(
    key: &[u8],
    ciphertext: &[u8],
    iv: &[u8],
    tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, VaultError> {
    if iv.len() != AES_GCM_NONCE_SIZE {
        return Err(VaultError::InvalidCiphertextLength(format!(
            "iv must be {} bytes, got {}",
            AES_GCM_NONCE_SIZE,
            iv.len()
        )));
    }
    if tag.len() != AES_GCM_TAG_SIZE {
        return Err(VaultError::InvalidCiphertextLength(format!(
            "auth tag must be {} bytes, got {}",
            AES_GCM_TAG_SIZE,
            tag.len()
        )));
    }

    let mut nonce = [0u8; AES_GCM_NONCE_SIZE];
    nonce.copy_from_slice(iv);

    let unbound_key = aead::UnboundKey::new(&aead::AES_256_GCM, key)?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleUseNonce(Some(nonce)));

    let mut in_out = Vec::with_capacity(ciphertext.len() + AES_GCM_TAG_SIZE);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext_len = match opening_key.open_in_place(Aad::from(aad), &mut in_out) {
        Ok(plaintext) => plaintext.len(),
        Err(_) => {
            in_out.zeroize();
            return Err(VaultError::AuthenticationFailure);
        }
    };

    in_out.truncate(plaintext_len);
    Ok(in_out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::kms::AES_256_KEY_SIZE;

    fn test_dek() -> DataEncryptionKey {
        let mut key = [0u8; AES_256_KEY_SIZE];
        SystemRandom::new().fill(&mut key).unwrap();
        DataEncryptionKey::new(key)
    }

    #[test]
    fn test_encrypt_decrypt() {
        let engine = AeadEngine::new();
        let dek = test_dek();
        let plaintext = b"Hello, World!";

        let sealed = engine.encrypt(&dek, plaintext, b"obj-1").unwrap();
        assert_eq!(sealed.ciphertext.len(), plaintext.len());
        assert_ne!(&sealed.ciphertext[..], plaintext);

        let decrypted = engine
            .decrypt(&dek, &sealed.ciphertext, &sealed.iv, &sealed.tag, b"obj-1")
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let engine = AeadEngine::new();
        let dek = test_dek();

        let sealed = engine.encrypt(&dek, b"", b"").unwrap();
        assert!(sealed.ciphertext.is_empty());

        let decrypted = engine
            .decrypt(&dek, &sealed.ciphertext, &sealed.iv, &sealed.tag, b"")
            .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_every_bit_flip_is_detected() {
        let engine = AeadEngine::new();
        let dek = test_dek();
        let sealed = engine.encrypt(&dek, b"attack at dawn", b"aad").unwrap();

        for byte in 0..sealed.ciphertext.len() {
            for bit in 0..8 {
                let mut ciphertext = sealed.ciphertext.clone();
                ciphertext[byte] ^= 1 << bit;
                let result = engine.decrypt(&dek, &ciphertext, &sealed.iv, &sealed.tag, b"aad");
                assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
            }
        }

        for byte in 0..AES_GCM_TAG_SIZE {
            for bit in 0..8 {
                let mut tag = sealed.tag;
                tag[byte] ^= 1 << bit;
                let result = engine.decrypt(&dek, &sealed.ciphertext, &sealed.iv, &tag, b"aad");
                assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
            }
        }
    }

    #[test]
    fn test_wrong_aad_fails() {
        let engine = AeadEngine::new();
        let dek = test_dek();
        let sealed = engine.encrypt(&dek, b"payload", b"obj-1").unwrap();

        let result = engine.decrypt(&dek, &sealed.ciphertext, &sealed.iv, &sealed.tag, b"obj-2");
        assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let engine = AeadEngine::new();
        let sealed = engine.encrypt(&test_dek(), b"payload", b"").unwrap();

        let result = engine.decrypt(&test_dek(), &sealed.ciphertext, &sealed.iv, &sealed.tag, b"");
        assert!(matches!(result, Err(VaultError::AuthenticationFailure)));
    }

    #[test]
    fn test_malformed_lengths_rejected() {
        let engine = AeadEngine::new();
        let dek = test_dek();
        let sealed = engine.encrypt(&dek, b"payload", b"").unwrap();

        let result = engine.decrypt(&dek, &sealed.ciphertext, &sealed.iv[..8], &sealed.tag, b"");
        assert!(matches!(result, Err(VaultError::InvalidCiphertextLength(_))));

        let result = engine.decrypt(&dek, &sealed.ciphertext, &sealed.iv, &sealed.tag[..15], b"");
        assert!(matches!(result, Err(VaultError::InvalidCiphertextLength(_))));
    }

    #[test]
    fn test_nonces_never_repeat() {
        let engine = AeadEngine::new();
        let dek = test_dek();
        let mut seen = HashSet::with_capacity(100_000);

        for _ in 0..100_000 {
            let sealed = engine.encrypt(&dek, b"same plaintext", b"").unwrap();
            assert!(seen.insert(sealed.iv), "nonce repeated");
        }
    }

    #[test]
    fn test_single_use_nonce_refuses_second_advance() {
        let mut seq = SingleUseNonce(Some([7u8; NONCE_LEN]));
        assert!(seq.advance().is_ok());
        assert!(seq.advance().is_err());
    }
}
