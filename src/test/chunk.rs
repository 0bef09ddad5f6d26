use crate::chunk::{read_chunk, ChunkAssembler};
use crate::chunk_header_area::{read_chunk_area, write_chunk};
use crate::compress::{Compressor, NullCompressor};
use crate::consts::{CHUNKMAX, CHUNKSIZE, DEFAULTREGIONSIZE, SECSIZE};
use crate::header::{CsumType, EncCipher, HeaderVersion, IntegrityFields};
use crate::integrity::ChecksumVerifier;
use crate::reloc::{RelocType, Relocation, RelocationTable};

#[test]
fn single_region_round_trip() {
    let reloc_table = RelocationTable::new();
    let mut assembler =
        ChunkAssembler::new(NullCompressor, HeaderVersion::V5, Some([3u8; 16]), None, &reloc_table);

    let raw = vec![0x42u8; (4 * SECSIZE) as usize];
    assembler.push_region(100, &raw).unwrap();
    let chunks = assembler.finish().unwrap();
    assert_eq!(chunks.len(), 1);

    let chunk = &chunks[0];
    assert_eq!(chunk.header.block_total, 1);
    assert_eq!(chunk.header.block_index, 0);
    assert_eq!(chunk.regions.len(), 1);
    assert_eq!(chunk.regions[0].start, 100);
    assert_eq!(chunk.regions[0].size, 4);
    assert_eq!(chunk.relocs.len(), 0);

    let bytes = write_chunk(&chunk.header, &chunk.regions, &chunk.relocs, &chunk.compressed).unwrap();
    assert_eq!(bytes.len() as u64, CHUNKSIZE);

    let parsed = read_chunk_area(&bytes, Some(0), true).unwrap();
    assert_eq!(parsed.header.block_index, 0);
    assert_eq!(parsed.header.region_count, 1);
    assert_eq!(parsed.regions.len(), 1);
    assert_eq!(parsed.regions[0].start, 100);
    assert_eq!(parsed.relocs.len(), 0);

    let payload_start = DEFAULTREGIONSIZE as usize;
    let payload_end = payload_start + parsed.header.size as usize;
    let payload = &bytes[payload_start..payload_end];
    assert_eq!(NullCompressor.decompress(payload).unwrap(), raw);
}

#[test]
fn oversized_payload_flushes_into_two_chunks() {
    let reloc_table = RelocationTable::new();
    let mut assembler =
        ChunkAssembler::new(NullCompressor, HeaderVersion::V5, Some([1u8; 16]), None, &reloc_table);

    // Exactly fills one chunk's data area on its own.
    let first_raw = vec![0xAAu8; CHUNKMAX as usize];
    let first_sectors = CHUNKMAX / SECSIZE;
    assembler.push_region(0, &first_raw).unwrap();

    // Pushing even one more sector's worth would overflow CHUNKMAX, so this
    // must flush the first chunk before starting the second.
    let second_raw = vec![0xBBu8; SECSIZE as usize];
    assembler.push_region(first_sectors, &second_raw).unwrap();

    let chunks = assembler.finish().unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].header.block_total, 2);
    assert_eq!(chunks[1].header.block_total, 2);
    assert_eq!(chunks[0].regions.len(), 1);
    assert_eq!(chunks[0].regions[0].size, first_sectors);
    assert_eq!(chunks[1].regions.len(), 1);
    assert_eq!(chunks[1].regions[0].start, first_sectors);
    assert_eq!(chunks[1].header.first_sect, first_sectors);
}

fn dense_relocs(sector: u64, count: u32) -> Vec<Relocation> {
    (0..count)
        .map(|_| Relocation {
            reloc_type: RelocType::None,
            sector,
            sectoff: 0,
            size: 4,
        })
        .collect()
}

/// Two regions whose combined region-descriptor bytes alone fit easily
/// within `DEFAULTREGIONSIZE`, but whose relocation descriptors (dense
/// within each region's own sector range) would overflow the header area
/// if both were packed into the same chunk. Splitting across two chunks
/// keeps each chunk's own reloc window small enough to fit.
#[test]
fn dense_relocations_force_an_extra_flush_beyond_region_capacity() {
    let mut reloc_table = RelocationTable::new();
    let mut buf = Vec::new();
    for r in dense_relocs(0, 85) {
        r.write(&mut buf, false).unwrap();
    }
    for r in dense_relocs(2, 85) {
        r.write(&mut buf, false).unwrap();
    }
    let mut cursor: &[u8] = &buf;
    reloc_table.append_from_chunk(170, false, &mut cursor).unwrap();

    let mut assembler =
        ChunkAssembler::new(NullCompressor, HeaderVersion::V5, Some([9u8; 16]), None, &reloc_table);

    let raw = vec![0x55u8; (2 * SECSIZE) as usize];
    assembler.push_region(0, &raw).unwrap();
    assembler.push_region(2, &raw).unwrap();

    let chunks = assembler.finish().unwrap();
    assert_eq!(
        chunks.len(),
        2,
        "the dense reloc cluster spanning both regions should have forced an early flush"
    );

    for chunk in &chunks {
        let bytes = write_chunk(&chunk.header, &chunk.regions, &chunk.relocs, &chunk.compressed).unwrap();
        assert_eq!(bytes.len() as u64, CHUNKSIZE);
    }
    assert_eq!(chunks[0].relocs.len(), 85);
    assert_eq!(chunks[1].relocs.len(), 85);
}

struct RejectAll;

impl ChecksumVerifier for RejectAll {
    fn verify(&self, _chunk: &[u8], _csum_type: CsumType, _signed: bool, _checksum: &[u8]) -> bool {
        false
    }
}

struct AcceptOnly(Vec<u8>);

impl ChecksumVerifier for AcceptOnly {
    fn verify(&self, _chunk: &[u8], _csum_type: CsumType, _signed: bool, checksum: &[u8]) -> bool {
        checksum == self.0.as_slice()
    }
}

fn integrity_fields(checksum: Vec<u8>) -> IntegrityFields {
    IntegrityFields {
        enc_cipher: EncCipher::None,
        csum_type: CsumType::Sha256,
        csum_signed: false,
        enc_iv: [0u8; crate::consts::ENC_MAX_KEYLEN],
        checksum,
    }
}

#[test]
fn read_chunk_rejects_a_bad_checksum() {
    let reloc_table = RelocationTable::new();
    let mut assembler = ChunkAssembler::new(
        NullCompressor,
        HeaderVersion::V6,
        Some([7u8; 16]),
        Some(integrity_fields(vec![0xAB; 32])),
        &reloc_table,
    );
    assembler.push_region(0, &vec![0x09u8; SECSIZE as usize]).unwrap();
    let chunks = assembler.finish().unwrap();
    let bytes = write_chunk(&chunks[0].header, &chunks[0].regions, &chunks[0].relocs, &chunks[0].compressed).unwrap();

    let err = read_chunk(&bytes, Some(0), true, &NullCompressor, &RejectAll).unwrap_err();
    assert!(matches!(err, crate::error::NdzError::Integrity(_)));
}

#[test]
fn read_chunk_gives_each_flushed_chunk_its_own_checksum() {
    let reloc_table = RelocationTable::new();
    let mut next = 0u8;
    let mut assembler = ChunkAssembler::new(NullCompressor, HeaderVersion::V6, Some([8u8; 16]), None, &reloc_table)
        .with_checksum(move |_payload| {
            next = next.wrapping_add(1);
            integrity_fields(vec![next; 32])
        });

    assembler.push_region(0, &vec![0x01u8; CHUNKMAX as usize]).unwrap();
    assembler
        .push_region(CHUNKMAX / SECSIZE, &vec![0x02u8; SECSIZE as usize])
        .unwrap();
    let chunks = assembler.finish().unwrap();
    assert_eq!(chunks.len(), 2);

    let checksum0 = chunks[0].header.integrity.as_ref().unwrap().checksum.clone();
    let checksum1 = chunks[1].header.integrity.as_ref().unwrap().checksum.clone();
    assert_ne!(checksum0, checksum1, "each chunk should get a distinct checksum");

    for (chunk, expected) in chunks.iter().zip([checksum0.clone(), checksum1.clone()]) {
        let bytes = write_chunk(&chunk.header, &chunk.regions, &chunk.relocs, &chunk.compressed).unwrap();
        let decoded = read_chunk(&bytes, Some(chunk.header.block_index), true, &NullCompressor, &AcceptOnly(expected)).unwrap();
        assert_eq!(decoded.payload.len() % SECSIZE as usize, 0);
    }
}
