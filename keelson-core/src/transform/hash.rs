//! Hashing transforms: SHA-2 and BLAKE2 families.
//!
//! The streaming stages replace the stream contents with the raw digest
//! bytes; the pure forms also offer a lowercase hex rendering.

use crate::error::TransformError;
use crate::pipeline::Stage;
use blake2::{Blake2b512, Blake2s256};
use sha2::{Digest, Sha256, Sha512};
use std::fmt::Write as _;
use std::sync::Arc;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn digest_stage<D: Digest + Send + Sync>() -> Stage
where
    D: 'static,
{
    Arc::new(|input, out| {
        let mut hasher = D::new();
        while let Some(chunk) = input.read_chunk()? {
            hasher.update(&chunk);
        }
        out.write(hasher.finalize().to_vec())?;
        Ok(())
    })
}

macro_rules! hash_module {
    ($name:ident, $algo:ty, $doc:literal) => {
        #[doc = $doc]
        pub mod $name {
            use super::*;

            pub fn digest(data: &[u8]) -> Result<Vec<u8>, TransformError> {
                let mut hasher = <$algo>::new();
                hasher.update(data);
                Ok(hasher.finalize().to_vec())
            }

            pub fn hex_digest(data: &[u8]) -> Result<String, TransformError> {
                Ok(hex(&digest(data)?))
            }

            /// Streaming stage replacing the stream with the digest bytes.
            #[must_use]
            pub fn digest_stage() -> Stage {
                super::digest_stage::<$algo>()
            }
        }
    };
}

hash_module!(sha256, Sha256, "SHA-256 (32-byte digest).");
hash_module!(sha512, Sha512, "SHA-512 (64-byte digest).");
hash_module!(blake2b, Blake2b512, "BLAKE2b-512 (64-byte digest).");
hash_module!(blake2s, Blake2s256, "BLAKE2s-256 (32-byte digest).");
