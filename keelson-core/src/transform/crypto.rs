//! Password-based AES-CBC encryption.
//!
//! Stream layout is `salt(16) | iv(16) | ciphertext`; the key is derived
//! with PBKDF2-HMAC-SHA256 over the password and the random salt. Matching
//! encrypt/decrypt transforms (same password) compose to the identity.

use crate::error::TransformError;
use crate::pipeline::Stage;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use std::sync::Arc;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const KEY_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 10_000;

fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `data` under `password`. Output is `salt | iv | ciphertext`.
pub fn encrypt(data: &[u8], password: &str) -> Result<Vec<u8>, TransformError> {
    let mut salt = [0u8; SALT_LEN];
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut iv);

    let key = derive_key(password, &salt);
    let ciphertext = Aes128CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data);

    let mut out = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `salt | iv | ciphertext` buffer produced by [`encrypt`].
///
/// Fails with [`TransformError::Crypto`] when the buffer is too short, the
/// password is wrong or the ciphertext was tampered with.
pub fn decrypt(data: &[u8], password: &str) -> Result<Vec<u8>, TransformError> {
    if data.len() < SALT_LEN + IV_LEN {
        return Err(TransformError::crypto(
            "encrypted data too short to contain salt and IV",
        ));
    }

    let (salt, rest) = data.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);

    let key = derive_key(password, salt);
    let iv: [u8; IV_LEN] = iv.try_into().expect("split_at guarantees length");

    Aes128CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| TransformError::crypto("decryption failed: bad password or corrupted data"))
}

/// Streaming stage encrypting everything that flows through it.
#[must_use]
pub fn encryption_stage(password: impl Into<String>) -> Stage {
    let password = password.into();
    Arc::new(move |input, out| {
        let plain = input.extract_until_eof()?;
        out.write(encrypt(&plain, &password)?)?;
        Ok(())
    })
}

/// Streaming stage undoing [`encryption_stage`] under the same password.
#[must_use]
pub fn decryption_stage(password: impl Into<String>) -> Stage {
    let password = password.into();
    Arc::new(move |input, out| {
        let sealed = input.extract_until_eof()?;
        out.write(decrypt(&sealed, &password)?)?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::stream::stream_pair;
    use crate::pipeline::{ExecutionMode, Pipeline};
    use bytes::Bytes;

    const SECRET: &[u8] = b"Confidential information: this text should never leak";

    #[test]
    fn round_trip_with_matching_password() {
        let sealed = encrypt(SECRET, "hunter2").unwrap();
        assert_eq!(decrypt(&sealed, "hunter2").unwrap(), SECRET);
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = encrypt(SECRET, "correct horse").unwrap();
        assert!(matches!(
            decrypt(&sealed, "battery staple"),
            Err(TransformError::Crypto(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut sealed = encrypt(SECRET, "hunter2").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(decrypt(&sealed, "hunter2").is_err());
    }

    #[test]
    fn truncated_input_fails() {
        assert!(decrypt(&[0u8; 8], "pw").is_err());
    }

    #[test]
    fn salts_randomize_ciphertext() {
        let a = encrypt(SECRET, "pw").unwrap();
        let b = encrypt(SECRET, "pw").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn stages_compose_to_identity() {
        let pipeline = Pipeline::new()
            .with_stage(encryption_stage("pipeline pw"))
            .with_stage(decryption_stage("pipeline pw"));

        let (producer, consumer) = stream_pair();
        producer.write(Bytes::from_static(SECRET)).unwrap();
        producer.close();

        let out = pipeline.process(consumer, ExecutionMode::Async);
        assert_eq!(out.extract_until_eof().unwrap(), Bytes::from_static(SECRET));
    }

    #[test]
    fn mismatched_stage_passwords_poison_the_stream() {
        let pipeline = Pipeline::new()
            .with_stage(encryption_stage("one"))
            .with_stage(decryption_stage("two"));

        let (producer, consumer) = stream_pair();
        producer.write(Bytes::from_static(SECRET)).unwrap();
        producer.close();

        let out = pipeline.process(consumer, ExecutionMode::Async);
        assert!(out.extract_until_eof().is_err());
    }
}
