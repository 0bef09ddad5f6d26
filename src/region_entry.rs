//! On-disk region descriptors: a contiguous allocated extent within a
//! chunk's header area, either 32-bit (`region_32`) or 64-bit (`region_64`)
//! depending on the chunk's header version.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::Result;

/// A `(start, size)` region descriptor, sector units, always held as 64-bit
/// in memory regardless of the wire width it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionEntry {
    pub start: u64,
    pub size: u64,
}

impl RegionEntry {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn read(r: &mut impl Read, is32: bool) -> Result<Self> {
        let (start, size) = if is32 {
            (
                r.read_u32::<LittleEndian>()? as u64,
                r.read_u32::<LittleEndian>()? as u64,
            )
        } else {
            (r.read_u64::<LittleEndian>()?, r.read_u64::<LittleEndian>()?)
        };
        Ok(RegionEntry { start, size })
    }

    pub fn write(&self, w: &mut impl Write, is32: bool) -> Result<()> {
        if is32 {
            w.write_u32::<LittleEndian>(self.start as u32)?;
            w.write_u32::<LittleEndian>(self.size as u32)?;
        } else {
            w.write_u64::<LittleEndian>(self.start)?;
            w.write_u64::<LittleEndian>(self.size)?;
        }
        Ok(())
    }

    pub fn wire_size(is32: bool) -> usize {
        if is32 {
            8
        } else {
            16
        }
    }
}
