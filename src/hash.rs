//! Hash regions and the in-memory signature (`hashinfo`) structure.
//!
//! A signature file (`HASH_MAGIC "hash"`) is a header plus an array of
//! `(start, size, chunkno, hash)` records. See [`crate::sigio`] for the
//! on-disk read/write paths; this module holds the in-memory shape and the
//! hash-algorithm abstraction the delta engine is generic over.

use crate::consts::{hash_chunk_does_span, hash_chunk_number, hash_chunk_set_span, HASH_MAXSIZE};

/// Which digest algorithm a signature's regions were hashed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
}

impl HashType {
    pub fn output_len(self) -> usize {
        match self {
            HashType::Md5 => 16,
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
        }
    }

    pub fn from_wire(v: u32) -> HashType {
        match v {
            1 => HashType::Sha1,
            2 => HashType::Sha256,
            // hashmap.c groups `case HASH_TYPE_MD5: default:` together, so
            // the original's fallback for an unrecognized value is MD5, not
            // SHA1. Preserve that leniency here.
            _ => HashType::Md5,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            HashType::Md5 => 0,
            HashType::Sha1 => 1,
            HashType::Sha256 => 2,
        }
    }
}

/// Pluggable digest: the engine performs no cryptography itself, it only
/// calls through this trait.
pub trait HashAlgorithm {
    fn hash_type(&self) -> HashType;
    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

/// One hash-region record: a `(start, size)` disk range plus the digest of
/// its bytes as of signature creation, and a chunk-placement annotation
/// filled in later by [`crate::delta::DeltaEngine::update_chunk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRegion {
    pub start: u64,
    pub size: u32,
    pub chunkno: u32,
    pub hash: Vec<u8>,
}

impl HashRegion {
    pub fn end(&self) -> u64 {
        self.start + self.size as u64
    }

    pub fn spans_chunk_boundary(&self) -> bool {
        hash_chunk_does_span(self.chunkno)
    }

    pub fn chunk_number(&self) -> u32 {
        hash_chunk_number(self.chunkno)
    }

    pub fn set_chunk_number(&mut self, chunkno: u32, spans: bool) {
        self.chunkno = if spans {
            hash_chunk_set_span(chunkno)
        } else {
            chunkno
        };
    }
}

/// The full in-memory signature: header fields plus an ordered list of
/// [`HashRegion`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashInfo {
    pub hash_type: HashType,
    pub blksize: u64,
    pub regions: Vec<HashRegion>,
}

impl HashInfo {
    pub fn empty(hash_type: HashType, blksize: u64) -> Self {
        HashInfo {
            hash_type,
            blksize,
            regions: Vec::new(),
        }
    }

    pub fn push_region(&mut self, start: u64, size: u32, hash: Vec<u8>) {
        debug_assert!(hash.len() <= HASH_MAXSIZE);
        self.regions.push(HashRegion {
            start,
            size,
            chunkno: 0,
            hash,
        });
    }
}
