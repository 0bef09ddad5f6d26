//! Chunk assembler.
//!
//! Packs a stream of `(start, size)` disk regions, with associated raw
//! sector bytes, and the relocations that fall within them, into fixed-size
//! 1 MiB chunks: a `DEFAULTREGIONSIZE`-byte header/region/reloc area up
//! front, and a compressed-data area behind it. Each chunk is compressed as
//! a single independent unit -- there is no cross-chunk compression -- so
//! region bytes are buffered raw per in-progress chunk and compressed as a
//! whole when the chunk is flushed.

use crate::chunk_header_area::{read_chunk_area, region_header_capacity};
use crate::compress::Compressor;
use crate::consts::*;
use crate::error::{NdzError, Result};
use crate::header::{ChunkHeader, HeaderVersion, IntegrityFields};
use crate::integrity::ChecksumVerifier;
use crate::region_entry::RegionEntry;
use crate::reloc::{Relocation, RelocationTable};

/// One fully packed chunk, ready to be written out by [`crate::header`]'s
/// wire codec plus a region/reloc write pass.
pub struct AssembledChunk {
    pub header: ChunkHeader,
    pub regions: Vec<RegionEntry>,
    pub relocs: Vec<Relocation>,
    pub compressed: Vec<u8>,
}

struct PendingRegion {
    start: u64,
    raw: Vec<u8>,
}

/// Builds a sequence of [`AssembledChunk`]s from an ordered stream of
/// `(start, raw_bytes)` region pushes.
pub struct ChunkAssembler<'a, C: Compressor> {
    compressor: C,
    version: HeaderVersion,
    image_id: Option<[u8; UUID_LENGTH]>,
    checksum: Option<Box<dyn FnMut(&[u8]) -> IntegrityFields + 'a>>,
    reloc_table: &'a RelocationTable,
    region_capacity: usize,
    header_size: usize,
    region_wire_size: usize,
    pending: Vec<PendingRegion>,
    pending_bytes: u64,
    carry_lastsect: Option<u64>,
    next_index: i32,
    done: Vec<AssembledChunk>,
}

impl<'a, C: Compressor> ChunkAssembler<'a, C> {
    pub fn new(
        compressor: C,
        version: HeaderVersion,
        image_id: Option<[u8; UUID_LENGTH]>,
        integrity_template: Option<IntegrityFields>,
        reloc_table: &'a RelocationTable,
    ) -> Self {
        let is32 = version.is32();
        let header_size = version.wire_size();
        let region_wire_size = RegionEntry::wire_size(is32);
        let region_capacity = region_header_capacity(header_size, region_wire_size);
        ChunkAssembler {
            compressor,
            version,
            image_id,
            checksum: integrity_template.map(|t| -> Box<dyn FnMut(&[u8]) -> IntegrityFields + 'a> {
                Box::new(move |_| t.clone())
            }),
            reloc_table,
            region_capacity,
            header_size,
            region_wire_size,
            pending: Vec::new(),
            pending_bytes: 0,
            carry_lastsect: None,
            next_index: 0,
            done: Vec::new(),
        }
    }

    /// Use a per-chunk checksum callback instead of one static template.
    /// `checksum` is invoked on each flushed chunk's compressed payload and
    /// its return value becomes that chunk's [`IntegrityFields`] -- this is
    /// how a caller plugs in the actual checksum computation (e.g. backed
    /// by a [`crate::integrity::ChecksumVerifier`]'s matching signer)
    /// instead of stamping every chunk with one identical value.
    pub fn with_checksum(mut self, checksum: impl FnMut(&[u8]) -> IntegrityFields + 'a) -> Self {
        self.checksum = Some(Box::new(checksum));
        self
    }

    fn is32(&self) -> bool {
        self.version.is32()
    }

    /// Add one allocated region's raw sector bytes. `start` must be
    /// strictly greater than the previous region's end (ascending,
    /// non-overlapping, per the Region invariants).
    pub fn push_region(&mut self, start: u64, raw: &[u8]) -> Result<()> {
        if let Some(last) = self.pending.last() {
            let last_end = last.start + (last.raw.len() as u64 / SECSIZE);
            if start < last_end {
                return Err(NdzError::Assertion("regions must be strictly ascending"));
            }
        }

        // Would adding this region overflow the header area -- either the
        // plain region-descriptor bound, or, accounting for the relocation
        // descriptors `select_relocs` will also pack into the same
        // DEFAULTREGIONSIZE area at flush time, the combined bound?
        if self.pending.len() + 1 > self.region_capacity || self.would_overflow_header_area(start, raw) {
            self.flush()?;
        }

        // Trial-compress everything including the candidate region; if it
        // would overflow the chunk's data area, flush what we have first
        // and start the new chunk with just this region.
        let mut trial_raw = Vec::with_capacity(self.pending_bytes as usize + raw.len());
        for p in &self.pending {
            trial_raw.extend_from_slice(&p.raw);
        }
        trial_raw.extend_from_slice(raw);
        let trial_compressed = self.compressor.compress(&trial_raw)?;

        if !self.pending.is_empty() && trial_compressed.len() as u64 > CHUNKMAX {
            self.flush()?;
        }

        self.pending.push(PendingRegion {
            start,
            raw: raw.to_vec(),
        });
        self.pending_bytes += raw.len() as u64;
        Ok(())
    }

    /// Would the header area (header + region descriptors + relocation
    /// descriptors) for the in-progress chunk, plus `(start, raw)`, exceed
    /// `DEFAULTREGIONSIZE`? Relocation count is estimated from the reloc
    /// table over the candidate chunk's sector span, the same span
    /// `select_relocs` will query at flush time.
    fn would_overflow_header_area(&self, start: u64, raw: &[u8]) -> bool {
        let candidate_regions = self.pending.len() + 1;
        let region_bytes = candidate_regions * self.region_wire_size;

        let first_sect = self
            .carry_lastsect
            .or_else(|| self.pending.first().map(|p| p.start))
            .unwrap_or(start);
        let last_sect = start + raw.len() as u64 / SECSIZE;
        let span = last_sect.saturating_sub(first_sect);
        let reloc_count = self.reloc_table.count_in_range(first_sect, span) as usize;
        let reloc_bytes = reloc_count * Relocation::wire_size(self.is32());

        self.header_size + region_bytes + reloc_bytes > DEFAULTREGIONSIZE as usize
    }

    /// Flush the in-progress chunk, if any regions are pending.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut raw = Vec::with_capacity(self.pending_bytes as usize);
        let mut regions = Vec::with_capacity(self.pending.len());
        for p in &self.pending {
            regions.push(RegionEntry {
                start: p.start,
                size: p.raw.len() as u64 / SECSIZE,
            });
            raw.extend_from_slice(&p.raw);
        }
        let compressed = self.compressor.compress(&raw)?;
        if compressed.len() as u64 > CHUNKMAX {
            return Err(NdzError::Format(
                "compressed chunk payload exceeds chunk capacity".into(),
            ));
        }

        let first_region = regions.first().copied().unwrap();
        let last_region = regions.last().copied().unwrap();
        let first_sect = self.carry_lastsect.unwrap_or(first_region.start);
        let last_sect = last_region.end();

        let relocs = self.select_relocs(first_sect, last_sect)?;
        let integrity = self.checksum.as_mut().map(|f| f(&compressed));

        let header = ChunkHeader {
            version: self.version,
            size: compressed.len() as u32,
            block_index: self.next_index,
            block_total: 0,
            region_size: DEFAULTREGIONSIZE as u32,
            region_count: regions.len() as i32,
            first_sect,
            last_sect,
            reloc_count: relocs.len() as i32,
            image_id: self.image_id,
            integrity,
        };

        self.done.push(AssembledChunk {
            header,
            regions,
            relocs,
            compressed,
        });

        self.next_index += 1;
        self.carry_lastsect = Some(last_sect);
        self.pending.clear();
        self.pending_bytes = 0;
        Ok(())
    }

    fn select_relocs(&self, first_sect: u64, last_sect: u64) -> Result<Vec<Relocation>> {
        let mut buf = Vec::new();
        let count =
            self.reloc_table
                .select_into_chunk(first_sect, last_sect, &mut buf, self.is32())?;
        let mut cursor: &[u8] = &buf;
        let mut out = Vec::with_capacity(count as usize);
        for _ in 0..count {
            out.push(Relocation::read(&mut cursor, self.is32())?);
        }
        Ok(out)
    }

    /// Finish the image: flush any in-progress chunk, then rewrite every
    /// chunk's `blocktotal` now that the final count is known (mirrors the
    /// original writer's "filled in after the final flush by rewriting all
    /// headers" behavior).
    pub fn finish(mut self) -> Result<Vec<AssembledChunk>> {
        self.flush()?;
        let total = self.done.len() as i32;
        for chunk in &mut self.done {
            chunk.header.block_total = total;
        }
        Ok(self.done)
    }
}

/// One decoded chunk: header, region/reloc descriptors, and the
/// decompressed payload, with its checksum already verified.
pub struct DecodedChunk {
    pub header: ChunkHeader,
    pub regions: Vec<RegionEntry>,
    pub relocs: Vec<Relocation>,
    pub payload: Vec<u8>,
}

/// Read and verify one chunk from a `CHUNKSIZE`-aligned buffer: parse the
/// header area, check the checksum (and signature, if `csum_signed`) over
/// the whole chunk buffer via `verifier`, then decompress the payload.
///
/// Mirrors `imagedump.c`'s `verify_checksum(hdr, buf, hdr->csum_type)` call
/// site: a verifier failure is fatal for this chunk and surfaces as
/// [`NdzError::Integrity`] rather than being silently decoded anyway.
pub fn read_chunk(
    buf: &[u8],
    expected_index: Option<i32>,
    checkindex: bool,
    compressor: &impl Compressor,
    verifier: &impl ChecksumVerifier,
) -> Result<DecodedChunk> {
    let area = read_chunk_area(buf, expected_index, checkindex)?;

    if let Some(integrity) = &area.header.integrity {
        if integrity.csum_type != crate::header::CsumType::None {
            let ok = verifier.verify(buf, integrity.csum_type, integrity.csum_signed, &integrity.checksum);
            if !ok {
                return Err(NdzError::Integrity(format!(
                    "chunk {} fails checksum",
                    area.header.block_index
                )));
            }
        }
    }

    let data_start = DEFAULTREGIONSIZE as usize;
    let data_end = data_start + area.header.size as usize;
    if data_end > buf.len() {
        return Err(NdzError::Format(
            "chunk header's compressed size exceeds buffer length".into(),
        ));
    }
    let payload = compressor.decompress(&buf[data_start..data_end])?;

    Ok(DecodedChunk {
        header: area.header,
        regions: area.regions,
        relocs: area.relocs,
        payload,
    })
}
