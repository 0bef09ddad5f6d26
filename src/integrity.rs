//! Opaque per-chunk integrity verification.
//!
//! The core holds no crypto knowledge: it hands the verifier the whole
//! chunk buffer and the header's checksum type/flags, and trusts a simple
//! `ok | bad` answer.

use crate::header::CsumType;

/// Verifies a chunk's checksum (and, if `CSUM_SIGNED` is set, the signature
/// over that checksum). Implementations own whatever crypto library and key
/// material the deployment requires; this crate never constructs one.
pub trait ChecksumVerifier {
    fn verify(&self, chunk: &[u8], csum_type: CsumType, signed: bool, checksum: &[u8]) -> bool;
}

/// A verifier that accepts everything. Useful for images/tests that carry
/// no integrity protection (`CsumType::None`) or don't care to check it.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ChecksumVerifier for AcceptAll {
    fn verify(&self, _chunk: &[u8], _csum_type: CsumType, _signed: bool, _checksum: &[u8]) -> bool {
        true
    }
}
