//! # Encryption Filter
//!
//! AES-128 in CFB mode, used as a resettable stream cipher between the
//! in-memory dictionary and the mapped record region.
//!
//! ## Why CFB
//!
//! The record region is an append log: every `set` extends the ciphertext
//! without rewriting what came before, and a compaction rewrites the whole
//! region under a fresh IV. CFB fits both because it is a self-synchronizing
//! stream mode:
//!
//! - ciphertext length equals plaintext length, so offsets in the file are
//!   identical with and without encryption;
//! - operation is in-place safe, so appends encrypt directly in the mapping;
//! - the cipher state after N bytes is a pure function of the last block of
//!   ciphertext, so an append continues the stream exactly where the
//!   previous write left off, with no IV reset.
//!
//! ## State Machine
//!
//! The filter carries the classic CFB-128 position state: the feedback
//! register (`vector`), the encrypted feedback block (`ecount`) serving as
//! the current keystream, and the byte position within it (`num`). Each
//! processed byte stores the ciphertext byte back into the feedback register
//! so that, at every block boundary, the register holds the previous 16
//! ciphertext bytes. Only the AES block primitive comes from the `aes`
//! crate; the mode state is carried here because mid-stream continuation
//! across separate `encrypt` calls is the whole point of the filter.
//!
//! ## Keys and IVs
//!
//! Keys are AES-128: shorter input keys are zero-padded, longer ones
//! truncated. A fresh store (or one predating random IVs) seeds the feedback
//! register from the key itself; stores at the random-IV format version
//! carry the IV in the meta header, refreshed from the OS entropy source on
//! every full rewrite.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::{AES_BLOCK_LEN, AES_IV_LEN, AES_KEY_LEN};

pub struct Crypt {
    cipher: Aes128,
    key: [u8; AES_KEY_LEN],
    vector: [u8; AES_BLOCK_LEN],
    ecount: [u8; AES_BLOCK_LEN],
    num: usize,
}

impl Crypt {
    /// Creates a filter keyed by `key`, with the feedback register seeded
    /// from the key (the pre-random-IV default).
    pub fn new(key: &[u8]) -> Self {
        let mut padded = [0u8; AES_KEY_LEN];
        let take = key.len().min(AES_KEY_LEN);
        padded[..take].copy_from_slice(&key[..take]);

        let cipher = Aes128::new(GenericArray::from_slice(&padded));
        Self {
            cipher,
            key: padded,
            vector: padded,
            ecount: [0u8; AES_BLOCK_LEN],
            num: 0,
        }
    }

    /// The (padded) AES key this filter was built with.
    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    /// Whether `candidate` denotes the same key as this filter.
    pub fn key_matches(&self, candidate: &[u8]) -> bool {
        let mut padded = [0u8; AES_KEY_LEN];
        let take = candidate.len().min(AES_KEY_LEN);
        padded[..take].copy_from_slice(&candidate[..take]);
        padded == self.key
    }

    /// Re-seeds the IV and rewinds the stream position to zero.
    pub fn reset(&mut self, iv: &[u8; AES_IV_LEN]) {
        self.vector = *iv;
        self.num = 0;
    }

    /// Rewinds to the key-derived IV used by stores that predate the
    /// random-IV format version.
    pub fn reset_default(&mut self) {
        self.vector = self.key;
        self.num = 0;
    }

    /// Encrypts `data` in place, continuing the stream from the current
    /// position.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.num == 0 {
                self.refill_keystream();
            }
            let cipher_byte = *byte ^ self.ecount[self.num];
            self.vector[self.num] = cipher_byte;
            *byte = cipher_byte;
            self.num = (self.num + 1) % AES_BLOCK_LEN;
        }
    }

    /// Decrypts `data` in place, continuing the stream from the current
    /// position.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.num == 0 {
                self.refill_keystream();
            }
            let cipher_byte = *byte;
            self.vector[self.num] = cipher_byte;
            *byte = cipher_byte ^ self.ecount[self.num];
            self.num = (self.num + 1) % AES_BLOCK_LEN;
        }
    }

    fn refill_keystream(&mut self) {
        let mut block = GenericArray::clone_from_slice(&self.vector);
        self.cipher.encrypt_block(&mut block);
        self.ecount.copy_from_slice(&block);
    }

    /// Fills `iv` with bytes from the OS entropy source.
    pub fn fill_random_iv(iv: &mut [u8; AES_IV_LEN]) {
        OsRng.fill_bytes(iv);
    }
}
