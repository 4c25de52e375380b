//! Hybrid RSA+AES decryption of link payloads.
//!
//! The wire format (an external, non-goal primitive in the source system)
//! is: each [`Recipient`](common::Recipient)'s `symmetric_key` field holds
//! an RSA-OAEP-wrapped `AES-256` key + 96-bit nonce; the link's `data` is
//! the matching AES-256-GCM ciphertext. `DecryptLinkData` reconstructs the
//! combined blob the hybrid primitive expects by concatenating the
//! recipient's wrapped key ahead of the ciphertext, exactly as the source
//! system's account/decryption plugin does.

pub mod error;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use common::model::LinkData;
use common::{Link, Recipient};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

pub use error::DecryptorError;

const NONCE_LEN: usize = 12;
const AES_KEY_LEN: usize = 32;

/// Decrypts link payloads addressed to this node.
pub struct Decryptor {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl Decryptor {
    /// Construct from a PEM-encoded RSA private key, deriving and caching
    /// the matching public key's PEM encoding.
    pub fn from_pem(pem: &str) -> Result<Self, DecryptorError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| DecryptorError::InvalidKey(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| DecryptorError::InvalidKey(e.to_string()))?;
        Ok(Self { private_key, public_key_pem })
    }

    /// The PEM encoding of this node's public key, as it would appear in a
    /// recipient list.
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Decrypt a single link data payload given the link's recipient list.
    #[instrument(level = "debug", skip_all)]
    pub fn decrypt_link_data(
        &self,
        cipher_bytes: &[u8],
        recipients: &[Recipient],
    ) -> Result<Vec<u8>, DecryptorError> {
        let recipient = recipients
            .iter()
            .find(|r| r.pub_key == self.public_key_pem)
            .ok_or(DecryptorError::NotInRecipients)?;

        let mut combined = Vec::with_capacity(recipient.symmetric_key.len() + cipher_bytes.len());
        combined.extend_from_slice(&recipient.symmetric_key);
        combined.extend_from_slice(cipher_bytes);

        hybrid_decrypt(&combined, &self.private_key)
    }

    /// Decrypt a link's `data` in place.
    #[instrument(level = "debug", skip(self, link))]
    pub fn decrypt_link(&self, link: &mut Link) -> Result<(), DecryptorError> {
        let cipher_bytes = link.data.as_bytes();
        if cipher_bytes.is_empty() {
            return Err(DecryptorError::NoData);
        }
        let recipients = &link.meta.data.recipients;
        if recipients.is_empty() {
            return Err(DecryptorError::NotInRecipients);
        }
        let plain = self.decrypt_link_data(cipher_bytes, recipients)?;
        link.data = LinkData::Bytes(plain);
        Ok(())
    }

    /// Decrypt a batch of links; the first error aborts the remainder.
    pub fn decrypt_links(&self, links: &mut [Link]) -> Result<(), DecryptorError> {
        for link in links.iter_mut() {
            self.decrypt_link(link)?;
        }
        Ok(())
    }

    /// Encrypt `plaintext` for the given recipient public keys, producing
    /// the ciphertext and the matching [`Recipient`] list. This is the
    /// writer-side counterpart the decrypt path above round-trips against;
    /// the source treats it as part of the same external hybrid-crypto
    /// primitive.
    pub fn encrypt_link_data(
        plaintext: &[u8],
        recipient_public_keys: &[&str],
    ) -> Result<(Vec<u8>, Vec<Recipient>), DecryptorError> {
        let mut aes_key = [0u8; AES_KEY_LEN];
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::RngCore::fill_bytes(&mut OsRng, &mut aes_key);
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&aes_key)
            .map_err(|e| DecryptorError::Crypto(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| DecryptorError::Crypto(e.to_string()))?;

        let mut key_and_nonce = Vec::with_capacity(AES_KEY_LEN + NONCE_LEN);
        key_and_nonce.extend_from_slice(&aes_key);
        key_and_nonce.extend_from_slice(&nonce_bytes);

        let mut recipients = Vec::with_capacity(recipient_public_keys.len());
        for pub_key in recipient_public_keys {
            let public_key = RsaPublicKey::from_public_key_pem(pub_key)
                .map_err(|e| DecryptorError::InvalidKey(e.to_string()))?;
            let wrapped = public_key
                .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key_and_nonce)
                .map_err(|e| DecryptorError::Crypto(e.to_string()))?;
            recipients.push(Recipient { pub_key: (*pub_key).to_owned(), symmetric_key: wrapped });
        }

        Ok((ciphertext, recipients))
    }
}

fn hybrid_decrypt(combined: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, DecryptorError> {
    let key_size = private_key.size();
    if combined.len() < key_size + NONCE_LEN {
        warn!(len = combined.len(), key_size, "ciphertext too short for hybrid envelope");
        return Err(DecryptorError::Crypto("ciphertext shorter than the hybrid envelope".into()));
    }
    let (wrapped_key, rest) = combined.split_at(key_size);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);

    let key_and_nonce = private_key
        .decrypt(Oaep::new::<Sha256>(), wrapped_key)
        .map_err(|e| DecryptorError::Crypto(e.to_string()))?;
    if key_and_nonce.len() != AES_KEY_LEN + NONCE_LEN {
        return Err(DecryptorError::Crypto("unwrapped key has unexpected length".into()));
    }
    let aes_key = &key_and_nonce[..AES_KEY_LEN];

    let cipher = Aes256Gcm::new_from_slice(aes_key).map_err(|e| DecryptorError::Crypto(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| DecryptorError::Crypto(e.to_string()))?;
    debug!(bytes = plaintext.len(), "decrypted link payload");
    Ok(plaintext)
}
