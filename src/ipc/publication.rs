use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;

use memmap2::MmapMut;

use super::layout::{self, RawRing};
use super::stream_path;

/// Default ring capacity per stream: 1 MiB of frame data.
pub const DEFAULT_CAPACITY: u64 = 1 << 20;

/// Outcome of a single non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The frame landed; the position is the new head.
    Accepted(u64),

    /// No room relative to the slowest attached consumer. The
    /// frame was not written and the caller must not retry in a
    /// loop on the hot path.
    BackPressured,

    /// The frame can never fit this ring.
    TooLarge,
}

/// Producer endpoint onto one stream.
///
/// CONTRACT:
/// - exactly one producer thread per stream
/// - `offer` never blocks and never suspends; its cost is one
///   bounded memcpy plus a handful of atomics
/// - frames are delivered to every attached consumer in offer
///   order
pub struct Publication {
    ring: RawRing,
    stream_id: i32,
}

impl Publication {
    /// Creates (or re-attaches to) the backing file for a
    /// stream and maps it.
    ///
    /// Capacity is rounded up to a power of two. Re-attaching
    /// to an existing file keeps its contents and positions, so
    /// a restarted producer continues after the last published
    /// frame.
    pub fn create(dir: &Path, stream_id: i32, capacity: u64) -> io::Result<Publication> {
        std::fs::create_dir_all(dir)?;
        let path = stream_path(dir, stream_id);
        let capacity = capacity.max(4096).next_power_of_two();
        let total = layout::HEADER_SIZE as u64 + capacity;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let existing = file.metadata()?.len();

        let ring = if existing == 0 {
            file.set_len(total)?;
            let map = unsafe { MmapMut::map_mut(&file)? };
            RawRing::init(map, capacity)
        } else {
            let map = unsafe { MmapMut::map_mut(&file)? };
            RawRing::open(map)?
        };

        Ok(Publication { ring, stream_id })
    }

    #[inline]
    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    /// Offers one frame onto the stream.
    #[inline]
    pub fn offer(&self, payload: &[u8]) -> Offer {
        let frame_len = layout::align8(layout::FRAME_HEADER + payload.len());
        let capacity = self.ring.capacity() as usize;

        // A frame must fit the ring with room to spare for a
        // padding marker, or it can never be published.
        if frame_len + layout::FRAME_HEADER > capacity {
            return Offer::TooLarge;
        }

        let mut head = self.ring.head().load(Ordering::Relaxed);

        // A frame never wraps: dead space before the ring end is
        // stamped as padding and the frame starts at the origin.
        let until_end = self.ring.until_ring_end(head);
        let padded = if until_end < frame_len { until_end } else { 0 };

        if self.used(head) + padded as u64 + frame_len as u64 > self.ring.capacity() {
            return Offer::BackPressured;
        }

        if padded > 0 {
            if padded >= layout::FRAME_HEADER {
                self.ring.write_padding(head);
            }
            head += padded as u64;
        }

        self.ring.write_frame(head, payload);
        let new_head = head + frame_len as u64;

        // Publish the frame: consumers load head with Acquire
        // and never look past it.
        self.ring.head().store(new_head, Ordering::Release);
        Offer::Accepted(new_head)
    }

    /// Bytes in flight relative to the slowest attached
    /// consumer. With no consumers the ring free-runs and is
    /// always empty.
    #[inline]
    fn used(&self, head: u64) -> u64 {
        let mut slowest = u64::MAX;
        for slot in 0..layout::MAX_CONSUMERS {
            if self.ring.consumer_active(slot).load(Ordering::Acquire) == 1 {
                let pos = self.ring.consumer_position(slot).load(Ordering::Acquire);
                slowest = slowest.min(pos);
            }
        }
        if slowest == u64::MAX { 0 } else { head - slowest }
    }
}
