//! Engine configuration.
//!
//! Per the Design Notes ("Global state"), the original keeps `hash_free`
//! and friends as module statics. This crate threads them explicitly
//! through a config value instead, so two [`crate::delta::DeltaEngine`]s
//! can run independently with different settings in the same process.

/// Tunable knobs for the hash-map delta engine and header codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeltaConfig {
    /// When a hash region's covered current-disk ranges have an interior
    /// gap (sectors freed since the prior image), `true` re-hashes the
    /// whole region on the chance the gap content is still unchanged
    /// (`changed = 0/1` path); `false` conservatively emits every covered
    /// range without comparing (`changed = 2`). Corresponds to the
    /// original's `hash_free` global, which defaulted to `1`.
    pub hash_free: bool,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        DeltaConfig { hash_free: true }
    }
}

/// Tunables for header parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderCodecConfig {
    /// Enable the `blockindex == expected-chunk-number` consistency check.
    /// The original silently disables this for V1 images with
    /// `blocktotal == 0`; callers reading such images should construct
    /// this with `checkindex: false`.
    pub checkindex: bool,
}
