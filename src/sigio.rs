//! Signature file (side-car hash file) I/O.
//!
//! Grounded on `readhashinfo`/`hashmap_write_hashfile` in `hashmap.c`. The
//! on-disk hash field width differs between the V1/V2 32-bit record layout
//! (sized for the MD5/SHA1 digests those versions actually carry) and the
//! V3 64-bit layout (sized to [`HASH_MAXSIZE`] so a future wider digest
//! does not require another format bump); see DESIGN.md for why this
//! reimplementation resolves the original's ambiguous `hashregion_32` vs
//! `hashregion` sizing this way.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use std::path::Path;

use crate::consts::*;
use crate::error::{NdzError, Result};
use crate::hash::{HashInfo, HashRegion, HashType};

/// Wire width of the hash field in a V1/V2 record: large enough for MD5
/// (16B) or SHA1 (20B), the only algorithms V2 signatures carry (see
/// `write_hashfile`'s SHA256-rejection rule).
const V1V2_HASH_FIELD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SigVersion {
    V1,
    V2,
    V3,
}

impl SigVersion {
    fn from_wire(v: u32) -> Result<Self> {
        match v {
            HASH_VERSION_1 => Ok(SigVersion::V1),
            HASH_VERSION_2 => Ok(SigVersion::V2),
            HASH_VERSION_3 => Ok(SigVersion::V3),
            other => Err(NdzError::Format(format!("unknown signature version {other}"))),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            SigVersion::V1 => HASH_VERSION_1,
            SigVersion::V2 => HASH_VERSION_2,
            SigVersion::V3 => HASH_VERSION_3,
        }
    }
}

/// Read a signature file, widening V1/V2 32-bit records into the canonical
/// 64-bit in-memory form and adding `poffset` (partition start) to each
/// region's `start` so addresses become disk-absolute.
pub fn read_hashinfo(r: &mut impl Read, poffset: u64) -> Result<HashInfo> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != HASH_MAGIC {
        return Err(NdzError::Format("not a valid signature file".into()));
    }

    let version = SigVersion::from_wire(r.read_u32::<LittleEndian>()?)?;
    let hash_type = HashType::from_wire(r.read_u32::<LittleEndian>()?);
    let nregions = r.read_u32::<LittleEndian>()?;
    let blksize = match version {
        SigVersion::V1 => HASHBLK_SIZE / SECSIZE,
        SigVersion::V2 | SigVersion::V3 => r.read_u32::<LittleEndian>()? as u64,
    };

    let mut regions = Vec::with_capacity(nregions as usize);
    for _ in 0..nregions {
        let (start, size, chunkno, hash_field_len) = match version {
            SigVersion::V1 | SigVersion::V2 => {
                let start = r.read_u32::<LittleEndian>()? as u64;
                let size = r.read_u32::<LittleEndian>()?;
                let chunkno = r.read_u32::<LittleEndian>()?;
                (start, size, chunkno, V1V2_HASH_FIELD)
            }
            SigVersion::V3 => {
                let start = r.read_u64::<LittleEndian>()?;
                let size = r.read_u32::<LittleEndian>()?;
                let chunkno = r.read_u32::<LittleEndian>()?;
                (start, size, chunkno, HASH_MAXSIZE)
            }
        };
        if size as u64 > blksize {
            return Err(NdzError::Format(format!(
                "hash region size {size} exceeds signature block size {blksize}"
            )));
        }
        let mut field = vec![0u8; hash_field_len];
        r.read_exact(&mut field)?;
        field.truncate(hash_type.output_len());

        regions.push(HashRegion {
            start: start + poffset,
            size,
            chunkno,
            hash: field,
        });
    }

    Ok(HashInfo {
        hash_type,
        blksize,
        regions,
    })
}

/// Default empty signature used when no prior signature file is given:
/// SHA-256, `blksize = HASHBLK_SIZE / SECSIZE`.
pub fn empty_hashinfo() -> HashInfo {
    HashInfo::empty(HashType::Sha256, HASHBLK_SIZE / SECSIZE)
}

/// Write a signature, choosing V2 or V3: V2 only if the target image
/// version predates V5, the hash type isn't SHA-256, and every
/// (poffset-relative) start fits in 32 bits; otherwise V3.
///
/// `poffset` is subtracted from each region's `start` before writing (the
/// signature is partition-relative on disk) and the in-memory copy is left
/// untouched -- `hinfo` is taken by reference and never mutated in place.
pub fn write_hashfile(w: &mut impl Write, hinfo: &HashInfo, poffset: u64, image_version: u32) -> Result<()> {
    let wants_v2 = image_version < COMPRESSED_V5 && hinfo.hash_type != HashType::Sha256;
    let fits32 = hinfo
        .regions
        .iter()
        .all(|r| r.start.checked_sub(poffset).map_or(false, |s| s <= u32::MAX as u64));

    let version = if wants_v2 && fits32 {
        SigVersion::V2
    } else {
        if wants_v2 && !fits32 {
            log::warn!("signature start exceeds 32 bits, writing V3 instead of V2");
        }
        SigVersion::V3
    };

    w.write_all(HASH_MAGIC)?;
    w.write_u32::<LittleEndian>(version.to_wire())?;
    w.write_u32::<LittleEndian>(hinfo.hash_type.to_wire())?;
    w.write_u32::<LittleEndian>(hinfo.regions.len() as u32)?;
    w.write_u32::<LittleEndian>(hinfo.blksize as u32)?;

    for reg in &hinfo.regions {
        let start = reg.start - poffset;
        match version {
            SigVersion::V2 => {
                w.write_u32::<LittleEndian>(start as u32)?;
                w.write_u32::<LittleEndian>(reg.size)?;
                w.write_u32::<LittleEndian>(reg.chunkno)?;
                let mut field = reg.hash.clone();
                field.resize(V1V2_HASH_FIELD, 0);
                w.write_all(&field)?;
            }
            SigVersion::V3 => {
                w.write_u64::<LittleEndian>(start)?;
                w.write_u32::<LittleEndian>(reg.size)?;
                w.write_u32::<LittleEndian>(reg.chunkno)?;
                let mut field = reg.hash.clone();
                field.resize(HASH_MAXSIZE, 0);
                w.write_all(&field)?;
            }
            SigVersion::V1 => unreachable!("write_hashfile never emits V1"),
        }
    }
    Ok(())
}

/// Derive the signature file path for an image: `fname` if given, else
/// `<iname>.sig`, with the `-` (stdout) / permission-denied fallbacks
/// described on [`pid_fallback_path`].
pub fn derive_sig_path(fname: Option<&str>, iname: &str) -> std::path::PathBuf {
    if let Some(f) = fname {
        return std::path::PathBuf::from(f);
    }
    if iname == "-" {
        return std::path::PathBuf::from("/tmp/stdout.sig");
    }
    let mut p = iname.to_string();
    p.push_str(".sig");
    std::path::PathBuf::from(p)
}

/// Fallback path used when `derive_sig_path`'s target cannot be opened for
/// writing (e.g. permission denied).
pub fn pid_fallback_path(pid: u32) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/tmp/{pid:06}.sig"))
}

/// Set the signature file's mtime (and atime) to match the image file's --
/// a crude but deterministic way to pair a signature with the image it was
/// taken against. Failure is logged and swallowed by the caller, not
/// propagated -- see `write_hashfile` callers in [`crate::delta`].
pub fn sync_mtime(sig_path: &Path, image_path: &Path) -> std::io::Result<()> {
    let meta = std::fs::metadata(image_path)?;
    let atime = meta.accessed()?;
    let mtime = meta.modified()?;
    let times = std::fs::FileTimes::new().set_accessed(atime).set_modified(mtime);
    let sig_file = std::fs::OpenOptions::new().write(true).open(sig_path)?;
    sig_file.set_times(times)
}

/// Resolve a signature path, write `hinfo` to it, and pair its mtime with
/// the image file -- the single entry point callers reach for instead of
/// composing `derive_sig_path`/`write_hashfile`/`sync_mtime` by hand.
///
/// Falls back to [`pid_fallback_path`] if the derived path can't be opened
/// for writing (permission denied). A failed mtime sync is logged and
/// swallowed, matching `write_hashfile`'s own warn-and-continue policy.
pub fn write_signature_file(
    hinfo: &HashInfo,
    poffset: u64,
    image_version: u32,
    fname: Option<&str>,
    iname: &str,
    image_path: &Path,
    pid: u32,
) -> Result<std::path::PathBuf> {
    let mut path = derive_sig_path(fname, iname);
    let mut file = match std::fs::File::create(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            path = pid_fallback_path(pid);
            std::fs::File::create(&path)?
        }
        Err(e) => return Err(e.into()),
    };

    write_hashfile(&mut file, hinfo, poffset, image_version)?;
    drop(file);

    if let Err(e) = sync_mtime(&path, image_path) {
        log::warn!("failed to sync signature mtime to image mtime: {e}");
    }

    Ok(path)
}
