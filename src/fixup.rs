//! Fixup integration.
//!
//! The fixup subsystem is an external collaborator: it knows about
//! byte-level patches (LILO/disklabel relocations) that must be applied to
//! a disk-read buffer before hashing. The delta engine only needs to ask
//! "does a fixup touch this range" and "apply pending fixups into this
//! buffer"; it does not know how fixups are represented. Applying fixups
//! is destructive to the caller-owned buffer, so the engine must
//! save/restore fixup state around the whole delta walk -- done here with
//! an RAII guard rather than the original's manual
//! `savefixups`/`restorefixups(0|1)` call pairing at every error path.

/// Byte-level patch source consulted by the hash-map delta engine.
pub trait FixupSource {
    /// True if any fixup overlaps sectors `[sector, sector+size)`.
    fn has_fixup(&self, sector: u64, size: u32) -> bool;

    /// Apply any fixups overlapping byte range `[byte_offset, byte_offset+byte_size)`
    /// directly into `buffer` (which holds exactly that many bytes already
    /// read from disk).
    fn apply_fixups(&mut self, byte_offset: u64, byte_size: u64, buffer: &mut [u8]);

    /// Snapshot current fixup application state so it can be restored.
    fn save(&mut self);

    /// Restore from the last `save()`. `commit` selects whether the
    /// snapshot is discarded (keeping what was applied, `true`) or rolled
    /// back (`false`, on error paths).
    fn restore(&mut self, commit: bool);
}

/// A fixup source that never has any fixups -- used when an image has none,
/// or in tests that don't exercise the fixup path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFixups;

impl FixupSource for NoFixups {
    fn has_fixup(&self, _sector: u64, _size: u32) -> bool {
        false
    }

    fn apply_fixups(&mut self, _byte_offset: u64, _byte_size: u64, _buffer: &mut [u8]) {}

    fn save(&mut self) {}

    fn restore(&mut self, _commit: bool) {}
}

/// RAII guard around one delta-engine call: calls `save()` on construction,
/// and `restore(commit)` on drop, so every exit path -- including an early
/// `?` return -- runs the restore exactly once. Call [`FixupGuard::commit`]
/// on the success path before the guard drops; otherwise it restores with
/// `commit = false` (roll back), matching the `error:` label in the
/// original's `hashmap_compute_delta`.
pub struct FixupGuard<'a, F: FixupSource> {
    source: &'a mut F,
    commit: bool,
}

impl<'a, F: FixupSource> FixupGuard<'a, F> {
    pub fn new(source: &'a mut F) -> Self {
        source.save();
        FixupGuard {
            source,
            commit: false,
        }
    }

    pub fn commit(&mut self) {
        self.commit = true;
    }

    pub fn source_mut(&mut self) -> &mut F {
        self.source
    }
}

impl<'a, F: FixupSource> Drop for FixupGuard<'a, F> {
    fn drop(&mut self) {
        self.source.restore(self.commit);
    }
}
