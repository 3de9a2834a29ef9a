//! Key agreement and record encryption for the secure channel.
//!
//! Each connection performs an ephemeral ECDH exchange over P-256 and
//! splits the shared secret into two directional keys:
//! `K1 = SHA-256(secret || 0x00)`, `K2 = SHA-256(secret || 0x01)`.
//! The initiator encrypts with K1 and decrypts with K2; the responder
//! is mirrored. Records are AES-256-CBC with a fresh random IV and an
//! HMAC-SHA-256 tag over `iv || ciphertext`, verified in constant time.

use crate::error::{AuthError, CryptoError, NetError};
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use docmesh_types::SecureEnvelope;
use hmac::{Hmac, Mac};
use p256::ecdh::EphemeralSecret;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use rand_core::OsRng;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

/// Which side of the key exchange this endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// The connecting side.
    Initiator,
    /// The accepting side.
    Responder,
}

/// Directional session keys derived from the shared secret.
#[derive(Clone)]
pub struct SessionKeys {
    /// Key for records this endpoint sends.
    pub encrypt: [u8; KEY_SIZE],
    /// Key for records this endpoint receives.
    pub decrypt: [u8; KEY_SIZE],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionKeys {{ encrypt: [REDACTED], decrypt: [REDACTED] }}")
    }
}

/// An ephemeral P-256 key pair for one connection.
pub struct EphemeralKey {
    secret: EphemeralSecret,
    public_der: Vec<u8>,
}

impl EphemeralKey {
    /// Generate a fresh key pair.
    pub fn generate() -> Result<Self, CryptoError> {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_der = secret
            .public_key()
            .to_public_key_der()
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?
            .as_bytes()
            .to_vec();
        Ok(Self { secret, public_der })
    }

    /// The public key as SubjectPublicKeyInfo DER, ready for the prolog.
    pub fn public_der(&self) -> &[u8] {
        &self.public_der
    }

    /// Complete the exchange against the peer's DER-encoded public key.
    pub fn agree(self, peer_der: &[u8], role: HandshakeRole) -> Result<SessionKeys, CryptoError> {
        let peer = PublicKey::from_public_key_der(peer_der)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let shared = self.secret.diffie_hellman(&peer);
        let secret_bytes = shared.raw_secret_bytes();

        let k1 = derive_key(secret_bytes, 0x00);
        let k2 = derive_key(secret_bytes, 0x01);

        Ok(match role {
            HandshakeRole::Initiator => SessionKeys {
                encrypt: k1,
                decrypt: k2,
            },
            HandshakeRole::Responder => SessionKeys {
                encrypt: k2,
                decrypt: k1,
            },
        })
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EphemeralKey {{ public: [{} bytes der] }}", self.public_der.len())
    }
}

fn derive_key(secret: &[u8], label: u8) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update([label]);
    hasher.finalize().into()
}

/// Per-connection record cipher state.
#[derive(Debug, Clone)]
pub struct CipherState {
    keys: SessionKeys,
}

impl CipherState {
    /// Wrap the negotiated keys.
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    /// Encrypt and authenticate one record.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SecureEnvelope, NetError> {
        let mut iv = [0u8; IV_SIZE];
        getrandom::getrandom(&mut iv).expect("getrandom failed");

        let cipher = Aes256CbcEnc::new_from_slices(&self.keys.encrypt, &iv)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let tag = record_tag(&self.keys.encrypt, &iv, &ciphertext);
        Ok(SecureEnvelope {
            ciphertext,
            iv,
            tag,
        })
    }

    /// Verify and decrypt one record.
    ///
    /// The tag check runs before any decryption and compares in
    /// constant time.
    pub fn open(&self, envelope: &SecureEnvelope) -> Result<Vec<u8>, NetError> {
        let mut mac = HmacSha256::new_from_slice(&self.keys.decrypt).expect("hmac accepts any key");
        mac.update(&envelope.iv);
        mac.update(&envelope.ciphertext);
        mac.verify_slice(&envelope.tag)
            .map_err(|_| AuthError::MacMismatch)?;

        let cipher = Aes256CbcDec::new_from_slices(&self.keys.decrypt, &envelope.iv)
            .map_err(|_| CryptoError::DecryptFailed)?;
        let plaintext = cipher
            .decrypt_padded_vec_mut::<Pkcs7>(&envelope.ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;
        Ok(plaintext)
    }
}

fn record_tag(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key");
    mac.update(iv);
    mac.update(ciphertext);
    mac.finalize().into_bytes().into()
}
