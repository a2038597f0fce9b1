use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;

use memmap2::MmapMut;

use super::layout::{self, RawRing};
use super::stream_path;

/// Slot state while an attach is mid-flight: claimed, position
/// not yet published. The producer only honors fully attached
/// slots.
const CLAIMING: u64 = 2;
const ATTACHED: u64 = 1;
const FREE: u64 = 0;

/// Consumer endpoint onto one stream.
///
/// Joins at the producer's current head: frames published
/// before attachment are not replayed. Any number of consumers
/// (up to the slot table size) may attach to the same stream;
/// each sees every frame from its join point on, in publication
/// order.
pub struct Subscription {
    ring: RawRing,
    slot: usize,
    position: u64,
}

impl Subscription {
    /// Maps an existing stream file and claims a consumer slot.
    pub fn attach(dir: &Path, stream_id: i32) -> io::Result<Subscription> {
        let path = stream_path(dir, stream_id);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        let ring = RawRing::open(map)?;

        let mut claimed = None;
        for slot in 0..layout::MAX_CONSUMERS {
            if ring
                .consumer_active(slot)
                .compare_exchange(FREE, CLAIMING, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                claimed = Some(slot);
                break;
            }
        }
        let Some(slot) = claimed else {
            return Err(io::Error::new(
                io::ErrorKind::ResourceBusy,
                "all consumer slots are taken",
            ));
        };

        // Publish the join position before flipping the slot
        // live, so the producer never sees a stale position.
        let position = ring.head().load(Ordering::Acquire);
        ring.consumer_position(slot).store(position, Ordering::Release);
        ring.consumer_active(slot).store(ATTACHED, Ordering::Release);

        Ok(Subscription { ring, slot, position })
    }

    /// Polls up to `limit` frames, invoking `handler` for each
    /// payload in publication order. Returns the number of
    /// frames handled.
    pub fn poll(&mut self, mut handler: impl FnMut(&[u8]), limit: usize) -> usize {
        let head = self.ring.head().load(Ordering::Acquire);
        let mut pos = self.position;
        let mut count = 0;

        while count < limit && pos < head {
            let len = self.ring.read_frame_len(pos);
            if len == layout::PADDING_MARKER {
                pos += self.ring.until_ring_end(pos) as u64;
                continue;
            }
            handler(self.ring.frame_payload(pos, len as usize));
            pos += layout::align8(layout::FRAME_HEADER + len as usize) as u64;
            count += 1;
        }

        if pos != self.position {
            self.position = pos;
            self.ring.consumer_position(self.slot).store(pos, Ordering::Release);
        }
        count
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.ring.consumer_active(self.slot).store(FREE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Offer, Publication};

    #[test]
    fn two_consumers_each_see_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let publication = Publication::create(dir.path(), 1011, 4096).unwrap();
        let mut first = Subscription::attach(dir.path(), 1011).unwrap();
        let mut second = Subscription::attach(dir.path(), 1011).unwrap();

        for i in 0u8..5 {
            assert!(matches!(publication.offer(&[i]), Offer::Accepted(_)));
        }

        let mut a = Vec::new();
        let mut b = Vec::new();
        first.poll(|f| a.push(f[0]), 16);
        second.poll(|f| b.push(f[0]), 16);
        assert_eq!(a, vec![0, 1, 2, 3, 4]);
        assert_eq!(b, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn detaching_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let publication = Publication::create(dir.path(), 1012, 4096).unwrap();
        for _ in 0..layout::MAX_CONSUMERS {
            // Dropped immediately; the slot is reusable.
            let _ = Subscription::attach(dir.path(), 1012).unwrap();
        }
        let extra: Vec<Subscription> = (0..layout::MAX_CONSUMERS)
            .map(|_| Subscription::attach(dir.path(), 1012).unwrap())
            .collect();
        assert!(Subscription::attach(dir.path(), 1012).is_err());
        drop(extra);
        assert!(Subscription::attach(dir.path(), 1012).is_ok());
        drop(publication);
    }

    #[test]
    fn attach_to_missing_stream_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Subscription::attach(dir.path(), 1013).is_err());
    }

    #[test]
    fn poll_respects_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let publication = Publication::create(dir.path(), 1014, 4096).unwrap();
        let mut subscription = Subscription::attach(dir.path(), 1014).unwrap();
        for i in 0u8..10 {
            assert!(matches!(publication.offer(&[i]), Offer::Accepted(_)));
        }
        assert_eq!(subscription.poll(|_| {}, 3), 3);
        assert_eq!(subscription.poll(|_| {}, 100), 7);
    }
}
