use std::str::FromStr;

use bytes::Bytes;
use data_encoding::HEXLOWER;
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// The content address of an op: the sha256 of its canonical protobuf
/// encoding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(Bytes);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid digest length: {0}")]
    InvalidDigestLen(usize),

    #[error("unsupported digest algorithm in {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid hex encoding in digest {0}")]
    InvalidEncoding(String),
}

pub const SHA256_LEN: usize = 32;

const SHA256_PREFIX: &str = "sha256:";

impl Digest {
    /// Hashes the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(&Sha256::digest(data)))
    }
}

impl TryFrom<Vec<u8>> for Digest {
    type Error = Error;

    // constructs a [Digest] from a [Vec<u8>].
    // Returns an error if the digest has the wrong length.
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        if value.len() != SHA256_LEN {
            Err(Error::InvalidDigestLen(value.len()))
        } else {
            Ok(Self(value.into()))
        }
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))?;

        HEXLOWER
            .decode(encoded.as_bytes())
            .map_err(|_| Error::InvalidEncoding(s.to_string()))?
            .try_into()
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, HEXLOWER.encode(&self.0))
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}
