//! The hash-map delta engine -- the heart of the codec. Grounded directly
//! on `hashmap_compute_delta` in `hashmap.c`: a synchronized linear walk
//! over the current-disk allocation (`drange`) and the prior signature's
//! hash regions (`hreg`).
//!
//! Everything the C code kept as module statics (`nhinfo`, `hashdata`,
//! `hashblksize`, `hashfunc`, `hashlen`, `imagefd`, `poffset`) is instead
//! owned by one `DeltaEngine` value, so independent deltas (e.g. one per
//! image, run on separate threads) don't share state.

use std::io::{Read, Seek, SeekFrom};

use crate::config::DeltaConfig;
use crate::consts::SECSIZE;
use crate::error::{NdzError, Result};
use crate::fixup::{FixupGuard, FixupSource};
use crate::hash::{HashAlgorithm, HashInfo};
use crate::range::{Range, RangeCursor, RangeList};

/// Output of [`DeltaEngine::compute_delta`].
pub struct DeltaResult {
    /// Current-disk ranges whose contents must be (re)captured.
    pub nranges: Vec<Range>,
    /// A fresh signature covering the current disk, if `newhashfile` was
    /// requested.
    pub nhinfo: Option<HashInfo>,
}

/// Owns the scratch read buffer and hash function for one delta
/// computation. Not `Clone`: each concurrent delta (across images, never
/// within one image's in-flight state) gets its own engine and its own
/// reader.
pub struct DeltaEngine<R: Read + Seek, H: HashAlgorithm> {
    reader: R,
    hash_algo: H,
    config: DeltaConfig,
    hashblksize: u64,
    ssect: u64,
    scratch: Vec<u8>,
}

impl<R: Read + Seek, H: HashAlgorithm> DeltaEngine<R, H> {
    pub fn new(reader: R, hash_algo: H, config: DeltaConfig) -> Self {
        DeltaEngine {
            reader,
            hash_algo,
            config,
            hashblksize: 0,
            ssect: 0,
            scratch: Vec::new(),
        }
    }

    /// Block size in bytes this engine is currently configured for.
    /// Meaningful only after a `compute_delta` call has run (it adopts the
    /// prior signature's `blksize`, or the default if none was given).
    pub fn block_size(&self) -> Result<u64> {
        if self.hashblksize == 0 {
            return Err(NdzError::Assertion(
                "block_size() called before any compute_delta call",
            ));
        }
        Ok(self.hashblksize * SECSIZE)
    }

    /// Read `size` sectors starting at absolute sector `start`, apply any
    /// fixups, and return the digest. Mirrors `hash_range`.
    fn hash_range(&mut self, start: u64, size: u32, fixups: &mut impl FixupSource) -> Result<Vec<u8>> {
        debug_assert!(size as u64 <= self.hashblksize);
        let byte_start = start * SECSIZE;
        let byte_size = size as u64 * SECSIZE;

        self.reader.seek(SeekFrom::Start(byte_start))?;
        self.scratch.resize(byte_size as usize, 0);
        self.reader.read_exact(&mut self.scratch)?;

        if fixups.has_fixup(start, size) {
            fixups.apply_fixups(byte_start, byte_size, &mut self.scratch);
        }

        Ok(self.hash_algo.digest(&self.scratch))
    }

    /// Build fresh hash-map entries for `[rstart, rstart+rsize)`, splitting
    /// at `hashblksize` boundaries measured relative to `self.ssect`
    /// (`add_to_hashmap`). If `rhash` is given the range is assumed to
    /// already fit in one block and that hash is used directly instead of
    /// re-reading and re-hashing.
    fn add_to_hashmap(
        &mut self,
        nhinfo: &mut HashInfo,
        mut rstart: u64,
        mut rsize: u64,
        rhash: Option<Vec<u8>>,
        fixups: &mut impl FixupSource,
    ) -> Result<()> {
        let mut offset = (rstart - self.ssect) % self.hashblksize;

        if let Some(hash) = rhash {
            debug_assert!(rsize <= self.hashblksize);
            nhinfo.push_region(rstart, rsize as u32, hash);
            return Ok(());
        }

        while rsize > 0 {
            let hsize = if offset != 0 {
                let h = (self.hashblksize - offset).min(rsize);
                offset = 0;
                h
            } else if rsize > self.hashblksize {
                self.hashblksize
            } else {
                rsize
            };

            let hash = self.hash_range(rstart, hsize as u32, fixups)?;
            nhinfo.push_region(rstart, hsize as u32, hash);

            rstart += hsize;
            rsize -= hsize;
        }
        Ok(())
    }

    /// Compute the delta between `curranges` (the current disk's allocated
    /// sectors) and `prior` (a previously read signature, or `None` for an
    /// empty prior image). `ssect` is the partition start; hash boundaries
    /// are relative to it.
    ///
    /// The fixup guard is held for the whole call regardless of
    /// `newhashfile` (a deliberately stricter reading of the "isolate the
    /// destructive action at the scope boundary" requirement than the
    /// original's `if (newhashfile) savefixups()`; see DESIGN.md).
    pub fn compute_delta(
        &mut self,
        curranges: &[Range],
        prior: Option<&HashInfo>,
        ssect: u64,
        newhashfile: bool,
        fixups: &mut impl FixupSource,
    ) -> Result<DeltaResult> {
        let hinfo = match prior {
            Some(h) => h.clone(),
            None => crate::sigio::empty_hashinfo(),
        };
        if self.hash_algo.hash_type() != hinfo.hash_type {
            return Err(NdzError::Assertion(
                "DeltaEngine's hash algorithm does not match the signature's hash type",
            ));
        }

        self.ssect = ssect;
        self.hashblksize = hinfo.blksize;
        self.scratch.clear();

        let mut guard = FixupGuard::new(fixups);
        let result = self.compute_delta_inner(curranges, &hinfo, newhashfile, guard.source_mut());
        if result.is_ok() {
            guard.commit();
        }
        result
    }

    fn compute_delta_inner(
        &mut self,
        curranges: &[Range],
        hinfo: &HashInfo,
        newhashfile: bool,
        fixups: &mut impl FixupSource,
    ) -> Result<DeltaResult> {
        let mut range_tail = RangeList::new();
        let mut nhinfo = newhashfile.then(|| HashInfo::empty(hinfo.hash_type, self.hashblksize));

        let mut dcursor = RangeCursor::new(curranges);

        'hregs: for hreg in &hinfo.regions {
            // 1. Drain leading dranges entirely below this hreg: new data.
            while let Some(cur) = dcursor.current() {
                if cur.end() <= hreg.start {
                    range_tail.push(cur.start, cur.size);
                    if let Some(nh) = nhinfo.as_mut() {
                        self.add_to_hashmap(nh, cur.start, cur.size, None, fixups)?;
                    }
                    dcursor.advance();
                } else {
                    break;
                }
            }
            let mut cur = match dcursor.current() {
                Some(c) => c,
                None => break 'hregs,
            };

            // 2. hreg entirely below drange: deallocated since the prior
            // image, drop it from the new signature.
            if hreg.end() <= cur.start {
                continue;
            }

            // 3. Head split: the part of drange before hreg is new data.
            if cur.start < hreg.start {
                let before = hreg.start - cur.start;
                range_tail.push(cur.start, before);
                if let Some(nh) = nhinfo.as_mut() {
                    self.add_to_hashmap(nh, cur.start, before, None, fixups)?;
                }
                dcursor.narrow_start(hreg.start);
                cur = dcursor
                    .current()
                    .ok_or(NdzError::Assertion("drange vanished after head split"))?;
            }

            // 4. Overlap decision.
            let changed: u8;
            let mut fresh_hash: Option<Vec<u8>> = None;
            if self.config.hash_free || (cur.start == hreg.start && cur.size >= hreg.size as u64) {
                if fixups.has_fixup(hreg.start, hreg.size) {
                    changed = 3;
                } else {
                    let hash = self.hash_range(hreg.start, hreg.size, fixups)?;
                    changed = if hash == hreg.hash { 0 } else { 1 };
                    if newhashfile {
                        fresh_hash = Some(hash);
                    }
                }
            } else {
                changed = 2;
            }

            // 5. Emit covered dranges.
            loop {
                let c = match dcursor.current() {
                    Some(c) => c,
                    None => break,
                };
                if c.start >= hreg.end() {
                    break;
                }
                let curstart = c.start;
                let hregend = hreg.end();
                let mut curend = c.end();
                let split = curend > hregend;
                if split {
                    curend = hregend;
                }

                if changed != 0 {
                    range_tail.push(curstart, curend - curstart);
                    if changed > 1 {
                        if let Some(nh) = nhinfo.as_mut() {
                            self.add_to_hashmap(nh, curstart, curend - curstart, None, fixups)?;
                        }
                    }
                }

                if split {
                    // Leave the tail (hregend..old end) for the next outer
                    // iteration; do not advance.
                    dcursor.narrow_start(hregend);
                } else {
                    dcursor.advance();
                }
            }

            if (changed == 0 || changed == 1) && newhashfile {
                if let Some(nh) = nhinfo.as_mut() {
                    let hash = fresh_hash.expect("hash computed whenever changed is 0 or 1");
                    nh.push_region(hreg.start, hreg.size, hash);
                }
            }

            if dcursor.current().is_none() {
                break 'hregs;
            }
        }

        // 6. Trailing dranges: everything left is new.
        while let Some(cur) = dcursor.current() {
            range_tail.push(cur.start, cur.size);
            if let Some(nh) = nhinfo.as_mut() {
                self.add_to_hashmap(nh, cur.start, cur.size, None, fixups)?;
            }
            dcursor.advance();
        }

        Ok(DeltaResult {
            nranges: range_tail.into_vec(),
            nhinfo,
        })
    }

    /// Fill in `chunkno` for every region of `nhinfo` that starts within
    /// `[ssect, lsect)`, marking regions that extend past `lsect` with the
    /// span bit. Mirrors `hashmap_update_chunk`.
    pub fn update_chunk(nhinfo: &mut HashInfo, ssect: u64, lsect: u64, chunkno: u32) -> Result<()> {
        let lsect_inclusive = lsect
            .checked_sub(1)
            .ok_or(NdzError::Assertion("update_chunk: lsect must be > 0"))?;

        for hreg in nhinfo.regions.iter_mut() {
            let hr_start = hreg.start;
            let hr_last = hr_start + hreg.size as u64 - 1;

            if hr_last < ssect {
                continue;
            }
            if hr_start > lsect_inclusive {
                break;
            }
            if hr_start < ssect {
                if !hreg.spans_chunk_boundary() {
                    return Err(NdzError::Assertion(
                        "region starting before this chunk's range must already carry the span bit",
                    ));
                }
                continue;
            }
            if hr_last <= lsect_inclusive {
                hreg.set_chunk_number(chunkno, false);
            } else {
                hreg.set_chunk_number(chunkno, true);
            }
        }
        Ok(())
    }
}
