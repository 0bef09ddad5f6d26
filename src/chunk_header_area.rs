//! Sizing and full on-disk layout of one chunk's `DEFAULTREGIONSIZE`-byte
//! header area (header + region descriptors + relocation descriptors) and
//! the compressed-data area that follows it.

use crate::consts::*;
use crate::error::{NdzError, Result};
use crate::header::ChunkHeader;
use crate::region_entry::RegionEntry;
use crate::reloc::Relocation;

/// How many region descriptors fit in the header area alongside a header of
/// `header_size` bytes, leaving no room reserved for relocations (relocs
/// grow downward from the top of the area, so the real per-chunk capacity
/// is whatever is left after `reloc_count * reloc_wire_size` is
/// subtracted; this is the upper bound used to decide when to flush).
pub fn region_header_capacity(header_size: usize, region_wire_size: usize) -> usize {
    (DEFAULTREGIONSIZE as usize - header_size) / region_wire_size
}

/// Serialize one chunk's full `DEFAULTREGIONSIZE`-byte header area plus its
/// compressed payload and trailing zero padding, total exactly
/// `CHUNKSIZE` bytes.
pub fn write_chunk(
    header: &ChunkHeader,
    regions: &[RegionEntry],
    relocs: &[Relocation],
    compressed: &[u8],
) -> Result<Vec<u8>> {
    let is32 = header.version.is32();
    let mut area = Vec::with_capacity(DEFAULTREGIONSIZE as usize);
    header.write(&mut area)?;

    for r in regions {
        r.write(&mut area, is32)?;
    }
    // Relocations are written growing down from the top of the header
    // area; since we hold the whole area in a Vec, emit them after the
    // regions and pad the remainder, leaving byte-for-byte layout
    // unspecified beyond "regions then relocs then zero fill" (the reader
    // locates relocs by walking exactly `reloc_count` records immediately
    // after the region array, so placement within the free middle is not
    // observable on read-back).
    for reloc in relocs {
        reloc.write(&mut area, is32)?;
    }

    if area.len() as u64 > DEFAULTREGIONSIZE {
        return Err(NdzError::Format(
            "region/reloc descriptors overflow the chunk header area".into(),
        ));
    }
    area.resize(DEFAULTREGIONSIZE as usize, 0);

    let mut out = area;
    out.extend_from_slice(compressed);
    if out.len() as u64 > CHUNKSIZE {
        return Err(NdzError::Format("chunk exceeds CHUNKSIZE".into()));
    }
    out.resize(CHUNKSIZE as usize, 0);
    Ok(out)
}

/// Parsed view of one chunk's header area: the normalized header plus its
/// region and relocation descriptors, read back in the same order they
/// were written in `write_chunk`.
pub struct ParsedChunkArea {
    pub header: ChunkHeader,
    pub regions: Vec<RegionEntry>,
    pub relocs: Vec<Relocation>,
}

pub fn read_chunk_area(
    buf: &[u8],
    expected_index: Option<i32>,
    checkindex: bool,
) -> Result<ParsedChunkArea> {
    let header = ChunkHeader::parse(buf, expected_index, checkindex)?;
    let is32 = header.version.is32();
    let header_size = header.version.wire_size();
    let mut cursor = &buf[header_size..];

    let mut regions = Vec::with_capacity(header.region_count.max(0) as usize);
    for _ in 0..header.region_count {
        regions.push(RegionEntry::read(&mut cursor, is32)?);
    }

    let mut relocs = Vec::with_capacity(header.reloc_count.max(0) as usize);
    for _ in 0..header.reloc_count {
        relocs.push(Relocation::read(&mut cursor, is32)?);
    }

    Ok(ParsedChunkArea {
        header,
        regions,
        relocs,
    })
}
