//! `ndzcore`: the chunked disk-image container format and hash-map delta
//! engine behind the NDZ compressed-image toolchain.
//!
//! This crate is the codec core only: wire parsing/serialization for the
//! chunked container (header, region table, relocation table), the
//! hash-based delta engine that decides what has changed between two images
//! of the same disk, and the small traits (compression, hashing, fixups,
//! checksum verification) that let a caller plug in the actual crypto and
//! I/O without this crate depending on any of it directly. It does not
//! implement a CLI, a disk-device driver, or network transport -- those
//! live above this crate, built on the types and traits exported here.

pub mod chunk;
pub mod chunk_header_area;
pub mod compress;
pub mod config;
pub mod consts;
pub mod delta;
pub mod error;
pub mod fixup;
pub mod hash;
pub mod header;
pub mod integrity;
pub mod region_entry;
pub mod reloc;
pub mod sigio;

mod range;

pub use chunk::{read_chunk, AssembledChunk, ChunkAssembler, DecodedChunk};
pub use chunk_header_area::{read_chunk_area, region_header_capacity, write_chunk, ParsedChunkArea};
pub use compress::{Compressor, NullCompressor, ZlibCompressor};
pub use config::{DeltaConfig, HeaderCodecConfig};
pub use delta::{DeltaEngine, DeltaResult};
pub use error::{NdzError, Result};
pub use fixup::{FixupGuard, FixupSource, NoFixups};
pub use hash::{HashAlgorithm, HashInfo, HashRegion, HashType};
pub use header::{ChunkHeader, CsumType, EncCipher, HeaderVersion, IntegrityFields};
pub use integrity::{AcceptAll, ChecksumVerifier};
pub use range::{Range, RangeCursor, RangeList};
pub use region_entry::RegionEntry;
pub use reloc::{RelocType, Relocation, RelocationTable, SectorWidth};
pub use sigio::{derive_sig_path, empty_hashinfo, pid_fallback_path, read_hashinfo, sync_mtime, write_hashfile, write_signature_file};

#[cfg(test)]
mod test;
