//! Per-chunk header codec.
//!
//! Wire layout is fixed little-endian. Each version's layout follows
//! `imagehdr.h`'s `blockhdr_V{1,2,3,5,6}` structs; V3 shares V2's layout
//! and V4 is a reserved hole that must be rejected.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::TryFromPrimitive;
use std::convert::TryFrom;
use std::io::{self, Read, Write};

use crate::consts::*;
use crate::error::{NdzError, Result};

/// Checksum algorithm recorded in a V6 header.
///
/// The original C header defines `CSUM_SHA1`, `CSUM_SHA256` and
/// `CSUM_SHA512` all as the value `1` -- almost certainly a bug, since it
/// makes the three indistinguishable on the wire. This reimplementation
/// gives each algorithm a distinct code instead of silently preserving
/// the collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum CsumType {
    None = 0,
    Sha1 = 1,
    Sha256 = 2,
    Sha512 = 3,
}

impl CsumType {
    pub fn from_u8(v: u8) -> Result<Self> {
        CsumType::try_from(v).map_err(|_| NdzError::Format(format!("unknown csum type {v}")))
    }
}

/// Encryption cipher recorded in a V6 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum EncCipher {
    None = 0,
    BlowfishCbc = 1,
}

impl EncCipher {
    pub fn from_u8(v: u8) -> Result<Self> {
        EncCipher::try_from(v).map_err(|_| NdzError::Format(format!("unknown cipher type {v}")))
    }
}

/// Authentication/integrity fields only present from V6 onward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFields {
    pub enc_cipher: EncCipher,
    pub csum_type: CsumType,
    pub csum_signed: bool,
    pub enc_iv: [u8; ENC_MAX_KEYLEN],
    pub checksum: Vec<u8>, // stored length-truncated; on disk always SIG_MAX_KEYLEN
}

/// Which header version produced a [`ChunkHeader`]. Kept distinct from the
/// sector width because V3 and V2 share a layout but V3 changes unzip
/// semantics (LILO relocations become meaningful), and quickcheck-style
/// callers want to know exactly what was on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVersion {
    V1,
    V2,
    V3,
    V5,
    V6,
}

impl HeaderVersion {
    pub fn from_magic(magic: u32) -> Result<Self> {
        if magic < COMPRESSED_MAGIC_BASE {
            return Err(NdzError::Format(format!("bad magic 0x{magic:08x}")));
        }
        match magic - COMPRESSED_MAGIC_BASE {
            0 => Ok(HeaderVersion::V1),
            1 => Ok(HeaderVersion::V2),
            2 => Ok(HeaderVersion::V3),
            3 => Err(NdzError::Format(
                "version 4 header was never released and is rejected".into(),
            )),
            4 => Ok(HeaderVersion::V5),
            5 => Ok(HeaderVersion::V6),
            _ => Err(NdzError::Format(format!("bad magic 0x{magic:08x}"))),
        }
    }

    pub fn magic(self) -> u32 {
        match self {
            HeaderVersion::V1 => COMPRESSED_V1,
            HeaderVersion::V2 => COMPRESSED_V2,
            HeaderVersion::V3 => COMPRESSED_V3,
            HeaderVersion::V5 => COMPRESSED_V5,
            HeaderVersion::V6 => COMPRESSED_V6,
        }
    }

    pub fn is32(self) -> bool {
        matches!(self, HeaderVersion::V1 | HeaderVersion::V2 | HeaderVersion::V3)
    }

    pub fn has_uuid(self) -> bool {
        matches!(self, HeaderVersion::V5 | HeaderVersion::V6)
    }

    /// Fixed on-disk size of this version's header (not counting the
    /// region/reloc descriptor arrays that follow it in the header area).
    pub fn wire_size(self) -> usize {
        match self {
            HeaderVersion::V1 => 24,
            HeaderVersion::V2 | HeaderVersion::V3 => 36,
            HeaderVersion::V5 => 36 + 16 + 16,
            HeaderVersion::V6 => 36 + 16 + 16 + 2 + 2 + ENC_MAX_KEYLEN + SIG_MAX_KEYLEN,
        }
    }
}

/// Normalized, version-tagged in-memory form of a chunk header. All
/// downstream code (relocation table, chunk assembler) reads through this
/// 64-bit accessor surface and never matches on `version` directly, per the
/// Design Notes' "tagged-variant representation" guidance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub version: HeaderVersion,
    pub size: u32,
    pub block_index: i32,
    pub block_total: i32,
    pub region_size: u32,
    pub region_count: i32,
    pub first_sect: u64,
    pub last_sect: u64,
    pub reloc_count: i32,
    pub image_id: Option<[u8; UUID_LENGTH]>,
    pub integrity: Option<IntegrityFields>,
}

impl ChunkHeader {
    /// Parse a header from the front of a chunk's header area.
    ///
    /// `expected_index` and `checkindex` implement the reader-side
    /// consistency check: on any chunk past the first, `blockindex` must
    /// equal the expected chunk number when index checking is enabled.
    /// Passing `checkindex = false` preserves the original's quirk that a
    /// V1 image with `blocktotal == 0` silently disables index validation.
    pub fn parse(buf: &[u8], expected_index: Option<i32>, checkindex: bool) -> Result<Self> {
        let mut cursor = buf;
        let magic = cursor.read_u32::<LittleEndian>()?;
        let version = HeaderVersion::from_magic(magic)?;

        let size = cursor.read_u32::<LittleEndian>()?;
        let block_index = cursor.read_i32::<LittleEndian>()?;
        let block_total = cursor.read_i32::<LittleEndian>()?;
        let region_size = cursor.read_i32::<LittleEndian>()? as u32;
        let region_count = cursor.read_i32::<LittleEndian>()?;

        if region_size != DEFAULTREGIONSIZE as u32 {
            log::warn!(
                "chunk {block_index}: non-standard region size {region_size} (expected {DEFAULTREGIONSIZE})"
            );
        }
        if size as u64 > CHUNKSIZE - region_size as u64 {
            return Err(NdzError::Format(format!(
                "chunk {block_index}: compressed size {size} exceeds chunk capacity"
            )));
        }

        let (first_sect, last_sect, reloc_count) = if version.is32() {
            if matches!(version, HeaderVersion::V1) {
                (0u64, 0u64, 0i32)
            } else {
                let first = cursor.read_u32::<LittleEndian>()? as u64;
                let last = cursor.read_u32::<LittleEndian>()? as u64;
                let relocs = cursor.read_i32::<LittleEndian>()?;
                (first, last, relocs)
            }
        } else {
            let first = cursor.read_u32::<LittleEndian>()? as u64;
            let last = cursor.read_u32::<LittleEndian>()? as u64;
            let relocs = cursor.read_i32::<LittleEndian>()?;
            // V5/V6 immediately follow with the 64-bit widened fields,
            // which supersede the 32-bit ones just read.
            let first64 = cursor.read_u64::<LittleEndian>()?;
            let last64 = cursor.read_u64::<LittleEndian>()?;
            let _ = (first, last);
            (first64, last64, relocs)
        };

        let image_id = if version.has_uuid() {
            let mut id = [0u8; UUID_LENGTH];
            cursor.read_exact(&mut id)?;
            Some(id)
        } else {
            None
        };

        let integrity = if matches!(version, HeaderVersion::V6) {
            let enc_cipher = EncCipher::from_u8(cursor.read_u16::<LittleEndian>()? as u8)?;
            let raw_csum = cursor.read_u16::<LittleEndian>()?;
            let csum_signed = raw_csum & CSUM_SIGNED != 0;
            let csum_type = CsumType::from_u8((raw_csum & CSUM_TYPE_MASK) as u8)?;
            let mut enc_iv = [0u8; ENC_MAX_KEYLEN];
            cursor.read_exact(&mut enc_iv)?;
            let mut checksum = vec![0u8; SIG_MAX_KEYLEN];
            cursor.read_exact(&mut checksum)?;
            Some(IntegrityFields {
                enc_cipher,
                csum_type,
                csum_signed,
                enc_iv,
                checksum,
            })
        } else {
            None
        };

        if checkindex {
            if let Some(expected) = expected_index {
                if block_index != expected {
                    return Err(NdzError::Format(format!(
                        "bad chunk index ({block_index}), expected {expected}"
                    )));
                }
            }
        }

        Ok(ChunkHeader {
            version,
            size,
            block_index,
            block_total,
            region_size,
            region_count,
            first_sect,
            last_sect,
            reloc_count,
            image_id,
            integrity,
        })
    }

    /// Serialize into `out`, little-endian, matching [`HeaderVersion::wire_size`].
    pub fn write(&self, out: &mut impl Write) -> Result<()> {
        out.write_u32::<LittleEndian>(self.version.magic())?;
        out.write_u32::<LittleEndian>(self.size)?;
        out.write_i32::<LittleEndian>(self.block_index)?;
        out.write_i32::<LittleEndian>(self.block_total)?;
        out.write_i32::<LittleEndian>(self.region_size as i32)?;
        out.write_i32::<LittleEndian>(self.region_count)?;

        if matches!(self.version, HeaderVersion::V1) {
            return Ok(());
        }

        out.write_u32::<LittleEndian>(self.first_sect as u32)?;
        out.write_u32::<LittleEndian>(self.last_sect as u32)?;
        out.write_i32::<LittleEndian>(self.reloc_count)?;

        if self.version.is32() {
            return Ok(());
        }

        out.write_u64::<LittleEndian>(self.first_sect)?;
        out.write_u64::<LittleEndian>(self.last_sect)?;
        let image_id = self
            .image_id
            .ok_or_else(|| NdzError::Assertion("V5+ header missing image_id"))?;
        out.write_all(&image_id)?;

        if !matches!(self.version, HeaderVersion::V6) {
            return Ok(());
        }

        let integ = self
            .integrity
            .as_ref()
            .ok_or_else(|| NdzError::Assertion("V6 header missing integrity fields"))?;
        out.write_u16::<LittleEndian>(integ.enc_cipher as u16)?;
        let mut raw_csum = integ.csum_type as u16;
        if integ.csum_signed {
            raw_csum |= CSUM_SIGNED;
        }
        out.write_u16::<LittleEndian>(raw_csum)?;
        out.write_all(&integ.enc_iv)?;
        let mut checksum = integ.checksum.clone();
        checksum.resize(SIG_MAX_KEYLEN, 0);
        out.write_all(&checksum)?;
        Ok(())
    }

    /// True if this and `first` are consistent per-image fields that must
    /// match across all chunks of one image: UUID, checksum type, cipher.
    pub fn consistent_with_first(&self, first: &ChunkHeader) -> Result<()> {
        if self.image_id != first.image_id {
            return Err(NdzError::Format("image UUID mismatch between chunks".into()));
        }
        match (&self.integrity, &first.integrity) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                if a.csum_type != b.csum_type || a.enc_cipher != b.enc_cipher {
                    return Err(NdzError::Format(
                        "checksum/cipher type mismatch between chunks".into(),
                    ));
                }
            }
            _ => {
                return Err(NdzError::Format(
                    "integrity field presence mismatch between chunks".into(),
                ))
            }
        }
        if first.block_total != 0 && self.block_total != first.block_total {
            return Err(NdzError::Format("blocktotal mismatch between chunks".into()));
        }
        Ok(())
    }
}

/// Read exactly `DEFAULTREGIONSIZE` bytes of header area from `r` into a
/// buffer suitable for [`ChunkHeader::parse`] plus region/reloc decoding.
pub fn read_header_area(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; DEFAULTREGIONSIZE as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}
