//! Pluggable compression for chunk payloads. The assembler and reader are
//! generic over this trait so the codec core never depends on a specific
//! compression crate; `flate2`'s zlib is wired in below as the default,
//! concrete implementation since it matches what on-the-wire NDZ images
//! actually use.

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::error::Result;

/// Compresses/decompresses one chunk's payload. A whole chunk is inflated
/// at once; there is no mid-stream random access into a chunk's payload.
pub trait Compressor {
    fn compress(&self, plain: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>>;
}

/// Default zlib compressor.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    pub level: Compression,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        ZlibCompressor {
            level: Compression::default(),
        }
    }
}

impl Compressor for ZlibCompressor {
    fn compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder.write_all(plain)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Passthrough compressor for tests: "compressed" output equals the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCompressor;

impl Compressor for NullCompressor {
    fn compress(&self, plain: &[u8]) -> Result<Vec<u8>> {
        Ok(plain.to_vec())
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed.to_vec())
    }
}
