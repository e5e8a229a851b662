//! Functions for the core crypto.
//!
//! Every onion layer is encrypted the same way: a fresh ephemeral X25519 key
//! pair is combined with the static X25519 key of the receiving hop, the
//! shared secret is turned into an AES-256 key with HMAC-SHA256 and the
//! plaintext is sealed with AES-GCM. The wire form of a sealed message is
//! `iv || ciphertext || tag`.

#![forbid(unsafe_code)]

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of X25519 keys in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM initialization vector prepended to every ciphertext.
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag.
pub const TAG_SIZE: usize = 16;

/// HMAC key used to turn an X25519 shared secret into an AES key.
const SYMMETRIC_KEY_SALT: &[u8] = b"LOKI";

/// Error that can happen during key handling or encryption.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CryptoError {
    /// Key is not valid hex.
    #[error("Key is not valid hex: {0}")]
    InvalidHex(String),
    /// Key has wrong length.
    #[error("Key must be 32 bytes, got {0}")]
    InvalidKeyLength(usize),
    /// X25519 produced an all-zero shared secret.
    #[error("Shared secret is degenerate")]
    WeakSharedSecret,
    /// AES-GCM failed to encrypt.
    #[error("Failed to encrypt")]
    Encrypt,
    /// Ciphertext is too short to contain IV and tag.
    #[error("Ciphertext is too short: {0} bytes")]
    CiphertextTooShort(usize),
    /// AES-GCM failed to authenticate or decrypt.
    #[error("Failed to decrypt")]
    Decrypt,
}

/// X25519 public key of a service node, a server or an ephemeral key pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Parse a public key from its hex representation.
    pub fn from_hex(s: &str) -> Result<PublicKey, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        PublicKey::from_slice(&bytes)
    }

    /// Create a public key from a slice of exactly `KEY_SIZE` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(bytes.len()))?;
        Ok(PublicKey(bytes))
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

/// X25519 secret key. Clamping happens on every scalar multiplication so the
/// raw random bytes are stored as is.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_SIZE]);

impl SecretKey {
    /// Generate a new random secret key.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> SecretKey {
        let mut bytes = [0; KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        SecretKey(bytes)
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(MontgomeryPoint::mul_base_clamped(self.0).to_bytes())
    }

    /// X25519 Diffie-Hellman with the other side's public key.
    pub fn diffie_hellman(&self, their_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        let shared = MontgomeryPoint(their_public.0).mul_clamped(self.0).to_bytes();
        if shared == [0; KEY_SIZE] {
            return Err(CryptoError::WeakSharedSecret);
        }
        Ok(SharedSecret(shared))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        SecretKey(bytes)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// Raw X25519 output. Only ever used to derive a `SymmetricKey`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; KEY_SIZE]);

impl SharedSecret {
    /// Derive the AES-256 key for this shared secret as
    /// `HMAC-SHA256(key = "LOKI", message = shared secret)`.
    pub fn symmetric_key(&self) -> SymmetricKey {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(SYMMETRIC_KEY_SALT)
            .expect("HMAC accepts keys of any size");
        mac.update(&self.0);
        SymmetricKey(mac.finalize().into_bytes().into())
    }
}

/// AES-256-GCM key shared between the client and exactly one hop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Seal `plaintext`. Output is `iv || ciphertext || tag`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| CryptoError::InvalidKeyLength(self.0.len()))?;
        let mut iv = [0; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        let ciphertext = cipher.encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut result = Vec::with_capacity(IV_SIZE + ciphertext.len());
        result.extend_from_slice(&iv);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Open data produced by `encrypt`.
    pub fn decrypt(&self, iv_and_ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if iv_and_ciphertext.len() < IV_SIZE + TAG_SIZE {
            return Err(CryptoError::CiphertextTooShort(iv_and_ciphertext.len()));
        }
        let (iv, ciphertext) = iv_and_ciphertext.split_at(IV_SIZE);
        let cipher = Aes256Gcm::new_from_slice(&self.0)
            .map_err(|_| CryptoError::InvalidKeyLength(self.0.len()))?;
        cipher.decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl From<[u8; KEY_SIZE]> for SymmetricKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        SymmetricKey(bytes)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Output of one encryption step.
#[derive(Clone, Debug)]
pub struct EncryptionResult {
    /// `iv || ciphertext || tag`
    pub ciphertext: Vec<u8>,
    /// Public half of the ephemeral key pair used for this step. The receiver
    /// needs it to derive the same symmetric key.
    pub ephemeral_public_key: PublicKey,
    /// Key the ciphertext was sealed with. Kept by the caller only for the
    /// destination layer, to open the response.
    pub symmetric_key: SymmetricKey,
}

/// Encrypt `plaintext` for the holder of `public_key` using a freshly
/// generated ephemeral key pair.
pub fn encrypt_for(public_key: &PublicKey, plaintext: &[u8]) -> Result<EncryptionResult, CryptoError> {
    let ephemeral_secret_key = SecretKey::generate(&mut OsRng);
    let symmetric_key = ephemeral_secret_key.diffie_hellman(public_key)?.symmetric_key();
    let ciphertext = symmetric_key.encrypt(plaintext)?;
    Ok(EncryptionResult {
        ciphertext,
        ephemeral_public_key: ephemeral_secret_key.public_key(),
        symmetric_key,
    })
}

/// Receiver side of `encrypt_for`: derive the symmetric key from our static
/// secret key and the sender's ephemeral public key.
pub fn receiver_key(secret_key: &SecretKey, ephemeral_public_key: &PublicKey) -> Result<SymmetricKey, CryptoError> {
    Ok(secret_key.diffie_hellman(ephemeral_public_key)?.symmetric_key())
}

/// Pick a random element using the OS random number generator.
pub fn random_element<T>(items: &[T]) -> Option<&T> {
    items.choose(&mut OsRng)
}

/// Return the items in a random order using the OS random number generator.
pub fn shuffled<T>(mut items: Vec<T>) -> Vec<T> {
    items.shuffle(&mut OsRng);
    items
}
