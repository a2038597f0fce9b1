//! On-disk layout of a stream ring.
//!
//! ```text
//! offset   size  field
//! 0        8     magic
//! 8        8     capacity (ring data bytes, power of two)
//! 64       8     head — producer byte position, monotonic
//! 128+i*64 8     consumer[i].active (0 = free, 1 = attached)
//! 136+i*64 8     consumer[i].position — monotonic byte position
//! 1024…          ring data
//! ```
//!
//! Positions are unwrapped byte offsets; `position & (capacity-1)`
//! is the ring offset. Frames are `u32 len + payload`, padded to
//! 8-byte alignment, and never wrap: a frame that would cross the
//! ring end is preceded by a padding marker and starts at the
//! next ring origin.

use std::sync::atomic::AtomicU64;

use memmap2::MmapMut;

pub const MAGIC: u64 = 0x4d44_5f52_494e_4731; // "MD_RING1"

pub const HEADER_SIZE: usize = 1024;
pub const MAX_CONSUMERS: usize = 8;

const MAGIC_OFFSET: usize = 0;
const CAPACITY_OFFSET: usize = 8;
const HEAD_OFFSET: usize = 64;
const CONSUMER_BASE: usize = 128;
const CONSUMER_STRIDE: usize = 64;

/// Frame length marker for dead space before the ring end.
pub const PADDING_MARKER: u32 = u32::MAX;

pub const FRAME_HEADER: usize = 4;

#[inline]
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// A mapped ring with typed access to the header atomics.
///
/// The atomics are references into the shared mapping, so every
/// attached process observes the same positions. Writes go
/// through a raw base pointer because the producer mutates the
/// data region while consumers hold the same mapping; the head
/// ordering protocol (payload first, head store with Release
/// last) keeps readers out of unfinished frames.
pub struct RawRing {
    map: MmapMut,
    base: *mut u8,
    capacity: u64,
}

// The mapping is MAP_SHARED memory accessed through atomics and
// position-fenced copies; the raw pointer is derived from the
// owned mapping.
unsafe impl Send for RawRing {}
unsafe impl Sync for RawRing {}

impl RawRing {
    /// Wraps a fresh mapping, stamping magic and capacity.
    pub fn init(mut map: MmapMut, capacity: u64) -> RawRing {
        map[MAGIC_OFFSET..MAGIC_OFFSET + 8].copy_from_slice(&MAGIC.to_le_bytes());
        map[CAPACITY_OFFSET..CAPACITY_OFFSET + 8].copy_from_slice(&capacity.to_le_bytes());
        let base = map.as_mut_ptr();
        RawRing { map, base, capacity }
    }

    /// Wraps an existing mapping after checking magic and
    /// reading the capacity back.
    pub fn open(mut map: MmapMut) -> std::io::Result<RawRing> {
        if map.len() < HEADER_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream file shorter than header",
            ));
        }
        let magic = u64::from_le_bytes(map[MAGIC_OFFSET..MAGIC_OFFSET + 8].try_into().unwrap());
        if magic != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream file magic mismatch",
            ));
        }
        let capacity =
            u64::from_le_bytes(map[CAPACITY_OFFSET..CAPACITY_OFFSET + 8].try_into().unwrap());
        if !capacity.is_power_of_two() || map.len() != HEADER_SIZE + capacity as usize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream file capacity mismatch",
            ));
        }
        let base = map.as_mut_ptr();
        Ok(RawRing { map, base, capacity })
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    fn atomic_at(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset + 8 <= HEADER_SIZE);
        debug_assert!(offset % 8 == 0);
        // The mapping outlives every reference handed out here
        // and the offset stays inside the header page.
        unsafe { &*(self.base.add(offset) as *const AtomicU64) }
    }

    #[inline]
    pub fn head(&self) -> &AtomicU64 {
        self.atomic_at(HEAD_OFFSET)
    }

    #[inline]
    pub fn consumer_active(&self, slot: usize) -> &AtomicU64 {
        self.atomic_at(CONSUMER_BASE + slot * CONSUMER_STRIDE)
    }

    #[inline]
    pub fn consumer_position(&self, slot: usize) -> &AtomicU64 {
        self.atomic_at(CONSUMER_BASE + slot * CONSUMER_STRIDE + 8)
    }

    /// Ring offset of an unwrapped position.
    #[inline]
    pub fn ring_offset(&self, position: u64) -> usize {
        (position & (self.capacity - 1)) as usize
    }

    /// Bytes left before the ring end at `position`.
    #[inline]
    pub fn until_ring_end(&self, position: u64) -> usize {
        self.capacity as usize - self.ring_offset(position)
    }

    #[inline]
    pub fn read_frame_len(&self, position: u64) -> u32 {
        let off = HEADER_SIZE + self.ring_offset(position);
        u32::from_le_bytes(self.map[off..off + 4].try_into().unwrap())
    }

    /// Copies a frame into the data region. Caller guarantees
    /// the frame fits before the ring end and that it owns the
    /// producer role.
    #[inline]
    pub fn write_frame(&self, position: u64, payload: &[u8]) {
        let off = HEADER_SIZE + self.ring_offset(position);
        debug_assert!(off + FRAME_HEADER + payload.len() <= self.map.len());
        unsafe {
            std::ptr::copy_nonoverlapping(
                (payload.len() as u32).to_le_bytes().as_ptr(),
                self.base.add(off),
                FRAME_HEADER,
            );
            std::ptr::copy_nonoverlapping(
                payload.as_ptr(),
                self.base.add(off + FRAME_HEADER),
                payload.len(),
            );
        }
    }

    /// Stamps a padding marker at `position`.
    #[inline]
    pub fn write_padding(&self, position: u64) {
        let off = HEADER_SIZE + self.ring_offset(position);
        unsafe {
            std::ptr::copy_nonoverlapping(
                PADDING_MARKER.to_le_bytes().as_ptr(),
                self.base.add(off),
                FRAME_HEADER,
            );
        }
    }

    /// Borrows a frame payload at `position` with the given
    /// length. Caller guarantees `position + len` is below the
    /// producer head.
    #[inline]
    pub fn frame_payload(&self, position: u64, len: usize) -> &[u8] {
        let off = HEADER_SIZE + self.ring_offset(position) + FRAME_HEADER;
        &self.map[off..off + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(12), 16);
        assert_eq!(align8(129), 136);
    }
}
