//! Pluggable block digesters.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Error type a [`Digester`] may fail with.
pub type DigestError = Box<dyn std::error::Error + Send + Sync>;

/// Block digester interface.
///
/// A digester is shared by every worker of a run, so it must be usable concurrently through `&self`.
pub trait Digester: Send + Sync {
    /// Compute the digest of a single block.
    ///
    /// Digests of a given digester are expected to have a fixed length.
    fn digest(&self, block: &[u8]) -> Result<Bytes, DigestError>;
}

/// SHA-256 digester, producing 32-byte digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl Digester for Sha256Digester {
    fn digest(&self, block: &[u8]) -> Result<Bytes, DigestError> {
        Ok(Bytes::copy_from_slice(&Sha256::digest(block)))
    }
}
