use std::io::Cursor;

use crate::config::DeltaConfig;
use crate::consts::SECSIZE;
use crate::delta::DeltaEngine;
use crate::fixup::{FixupSource, NoFixups};
use crate::hash::{HashAlgorithm, HashInfo, HashRegion, HashType};
use crate::range::Range;

/// A cheap, deterministic stand-in digest -- the delta engine never
/// performs cryptography itself, it only calls through [`HashAlgorithm`],
/// so correctness here doesn't depend on any particular algorithm's
/// properties.
fn test_hash(data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HashType::Sha256.output_len()];
    for (i, b) in data.iter().enumerate() {
        let slot = i % out.len();
        out[slot] ^= b.wrapping_add(i as u8);
    }
    out
}

#[derive(Clone, Copy, Default)]
struct TestHash;

impl HashAlgorithm for TestHash {
    fn hash_type(&self) -> HashType {
        HashType::Sha256
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        test_hash(data)
    }
}

/// A fixup source reporting exactly one covered sector range.
struct FixupAt {
    start: u64,
    size: u32,
}

impl FixupSource for FixupAt {
    fn has_fixup(&self, sector: u64, size: u32) -> bool {
        sector < self.start + self.size as u64 && sector + size as u64 > self.start
    }

    fn apply_fixups(&mut self, _byte_offset: u64, _byte_size: u64, _buffer: &mut [u8]) {}

    fn save(&mut self) {}
    fn restore(&mut self, _commit: bool) {}
}

fn make_disk(sectors: u64) -> Cursor<Vec<u8>> {
    let mut data = vec![0u8; (sectors * SECSIZE) as usize];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 256) as u8;
    }
    Cursor::new(data)
}

fn disk_bytes(disk: &Cursor<Vec<u8>>, start_sector: u64, size_sectors: u64) -> Vec<u8> {
    let start = (start_sector * SECSIZE) as usize;
    let end = start + (size_sectors * SECSIZE) as usize;
    disk.get_ref()[start..end].to_vec()
}

#[test]
fn identical_disk_yields_no_delta() {
    let disk = make_disk(300);
    let h1 = test_hash(&disk_bytes(&disk, 100, 50));
    let h2 = test_hash(&disk_bytes(&disk, 200, 30));
    let hinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![
            HashRegion { start: 100, size: 50, chunkno: 0, hash: h1.clone() },
            HashRegion { start: 200, size: 30, chunkno: 0, hash: h2.clone() },
        ],
    };
    let curranges = [Range::new(100, 50), Range::new(200, 30)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig::default());
    let mut fixups = NoFixups;
    let result = engine
        .compute_delta(&curranges, Some(&hinfo), 0, true, &mut fixups)
        .unwrap();

    assert!(result.nranges.is_empty());
    let nh = result.nhinfo.unwrap();
    assert_eq!(nh.regions.len(), 2);
    assert_eq!(nh.regions[0].hash, h1);
    assert_eq!(nh.regions[1].hash, h2);
}

#[test]
fn fully_new_disk_with_no_prior_signature() {
    let disk = make_disk(200);
    let curranges = [Range::new(0, 100)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig::default());
    let mut fixups = NoFixups;
    let result = engine
        .compute_delta(&curranges, None, 0, true, &mut fixups)
        .unwrap();

    assert_eq!(result.nranges, vec![Range::new(0, 100)]);
    let nh = result.nhinfo.unwrap();
    assert_eq!(nh.regions.len(), 1);
    assert_eq!(nh.regions[0].start, 0);
    assert_eq!(nh.regions[0].size, 100);
}

#[test]
fn deallocation_only_drops_region_from_new_signature() {
    let disk = make_disk(700);
    let hash = test_hash(&disk_bytes(&disk, 500, 20));
    let hinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![HashRegion { start: 500, size: 20, chunkno: 0, hash }],
    };
    let curranges = [Range::new(0, 50), Range::new(600, 10)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig::default());
    let mut fixups = NoFixups;
    let result = engine
        .compute_delta(&curranges, Some(&hinfo), 0, true, &mut fixups)
        .unwrap();

    assert_eq!(result.nranges, curranges.to_vec());
    let nh = result.nhinfo.unwrap();
    assert!(nh.regions.iter().all(|r| !(r.start == 500 && r.size == 20)));
}

#[test]
fn partial_overlap_with_gap_hash_free_true_is_treated_as_unchanged() {
    let disk = make_disk(200);
    let hash = test_hash(&disk_bytes(&disk, 0, 100));
    let hinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![HashRegion { start: 0, size: 100, chunkno: 0, hash: hash.clone() }],
    };
    let curranges = [Range::new(0, 30), Range::new(60, 40)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig { hash_free: true });
    let mut fixups = NoFixups;
    let result = engine
        .compute_delta(&curranges, Some(&hinfo), 0, true, &mut fixups)
        .unwrap();

    assert!(result.nranges.is_empty());
    let nh = result.nhinfo.unwrap();
    assert_eq!(nh.regions.len(), 1);
    assert_eq!(nh.regions[0].hash, hash);
    assert_eq!((nh.regions[0].start, nh.regions[0].size), (0, 100));
}

#[test]
fn same_gap_with_hash_free_false_emits_every_drange() {
    let disk = make_disk(200);
    let hash = test_hash(&disk_bytes(&disk, 0, 100));
    let hinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![HashRegion { start: 0, size: 100, chunkno: 0, hash }],
    };
    let curranges = [Range::new(0, 30), Range::new(60, 40)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig { hash_free: false });
    let mut fixups = NoFixups;
    let result = engine
        .compute_delta(&curranges, Some(&hinfo), 0, true, &mut fixups)
        .unwrap();

    assert_eq!(result.nranges, vec![Range::new(0, 30), Range::new(60, 40)]);
    let nh = result.nhinfo.unwrap();
    assert_eq!(nh.regions.len(), 2);
}

#[test]
fn fixup_overlap_forces_conservative_emission_despite_matching_hash() {
    let disk = make_disk(200);
    // The stored hash genuinely matches the current disk bytes: absent the
    // fixup, this would take the changed=0 (unchanged) path.
    let hash = test_hash(&disk_bytes(&disk, 0, 100));
    let hinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![HashRegion { start: 0, size: 100, chunkno: 0, hash: hash.clone() }],
    };
    let curranges = [Range::new(0, 100)];

    let mut engine = DeltaEngine::new(disk, TestHash, DeltaConfig::default());
    let mut fixups = FixupAt { start: 0, size: 100 };
    let result = engine
        .compute_delta(&curranges, Some(&hinfo), 0, true, &mut fixups)
        .unwrap();

    // A fixup-covered region must never be treated as unchanged, even when
    // its hash happens to match.
    assert_eq!(result.nranges, vec![Range::new(0, 100)]);
    let nh = result.nhinfo.unwrap();
    assert_eq!(nh.regions.len(), 1);
    assert_eq!(nh.regions[0].hash, hash);
}

#[test]
fn update_chunk_marks_span_bit_for_crossing_regions() {
    let mut nhinfo = HashInfo {
        hash_type: HashType::Sha256,
        blksize: 1000,
        regions: vec![
            HashRegion { start: 0, size: 50, chunkno: 0, hash: vec![] },
            HashRegion { start: 80, size: 40, chunkno: 0, hash: vec![] },
        ],
    };

    DeltaEngine::<Cursor<Vec<u8>>, TestHash>::update_chunk(&mut nhinfo, 0, 100, 5).unwrap();
    assert_eq!(nhinfo.regions[0].chunk_number(), 5);
    assert!(!nhinfo.regions[0].spans_chunk_boundary());
    assert_eq!(nhinfo.regions[1].chunk_number(), 5);
    assert!(nhinfo.regions[1].spans_chunk_boundary());

    DeltaEngine::<Cursor<Vec<u8>>, TestHash>::update_chunk(&mut nhinfo, 100, 200, 6).unwrap();
    assert_eq!(nhinfo.regions[1].chunk_number(), 5);
    assert!(nhinfo.regions[1].spans_chunk_boundary());
}
