//! Receive-path bookkeeping for validated NDPs.
//!
//! The receive path validates each incoming NTB, then queues one
//! descriptor per NDP until the datagrams are handed up. Tearing down a
//! multiplexing session cancels every descriptor still pending for it.
#![no_std]
#![deny(unsafe_op_in_unsafe_fn, clippy::multiple_unsafe_ops_per_block)]

use mbb_rs::{NdpCount, NtbVariant, NtbView, ValidationError};

// During tests, allow importing std
#[cfg(test)]
extern crate std;

/// A validated NDP waiting to be serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvNdp {
    /// MBIM session the datagrams belong to, or `None` for a plain NCM
    /// table.
    pub session_id: Option<u8>,
    /// Offset of the NDP within its block.
    pub ndp_offset: u32,
    /// Datagram pointer pairs in the table, terminator included.
    pub datagram_count: u32,
}

/// A bounded FIFO of pending [`RecvNdp`]s.
///
/// When full, enqueuing drops the oldest descriptor to make room, since
/// servicing fresh receives matters more than stale ones the host never
/// got to.
#[derive(Debug)]
pub struct RecvNdpQueue<const LEN: usize> {
    queue: [Option<RecvNdp>; LEN],

    // both heads are kept reduced mod LEN; the queue is empty when they
    // coincide, so one slot always stays free to tell empty from full
    read_head: usize,
    write_head: usize,
}

impl<const LEN: usize> RecvNdpQueue<LEN> {
    pub fn new() -> Self {
        Self {
            queue: [None; LEN],
            read_head: 0,
            write_head: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read_head == self.write_head
    }

    pub fn is_full(&self) -> bool {
        self.len() == (LEN - 1) as u32
    }

    pub fn len(&self) -> u32 {
        // The heads are reduced mod LEN, so bias the difference by LEN to
        // keep it non-negative; a plain wrapping subtraction would reduce
        // 2^64 - k instead, which is wrong for any LEN that is not a
        // power of two
        ((self.write_head + LEN - self.read_head) % LEN) as u32
    }

    /// Enqueues a descriptor, returning the oldest one if it had to be
    /// evicted to make room.
    pub fn enqueue(&mut self, element: RecvNdp) -> Option<RecvNdp> {
        let old_element = if self.is_full() { self.dequeue() } else { None };
        let _ = self.enqueue_inner(element);
        old_element
    }

    fn enqueue_inner(&mut self, element: RecvNdp) -> Result<(), RecvNdp> {
        if self.is_full() {
            return Err(element);
        }

        let slot = self.write_head;
        let old_slot = self.queue[slot].replace(element);
        debug_assert!(old_slot.is_none(), "writing to occupied slot {slot}");
        self.write_head = self.write_head.wrapping_add(1) % LEN;
        Ok(())
    }

    pub fn dequeue(&mut self) -> Option<RecvNdp> {
        if self.read_head == self.write_head {
            // queue is empty
            return None;
        }

        let element = self.queue[self.read_head].take();
        self.read_head = self.read_head.wrapping_add(1) % LEN;
        element
    }

    pub fn front(&self) -> Option<&RecvNdp> {
        if self.is_empty() {
            return None;
        }

        self.queue[self.read_head].as_ref()
    }

    /// Validates a received block and queues one descriptor per NDP.
    ///
    /// The block is validated in full before anything is queued, so a
    /// rejected block never leaves partial descriptors behind; the
    /// caller drops the buffer and moves on to the next transfer.
    pub fn queue_ntb(
        &mut self,
        buffer: &[u8],
        variant: NtbVariant,
    ) -> Result<NdpCount, ValidationError> {
        let count = match mbb_rs::validate(buffer, variant) {
            Ok(count) => count,
            Err(err) => {
                log::warn!("dropping invalid NTB ({} bytes): {err}", buffer.len());
                return Err(err);
            }
        };

        // The walk cannot fail past this point
        let view = NtbView::parse(buffer, variant)?;
        for entry in view.ndps() {
            let entry = entry?;
            let evicted = self.enqueue(RecvNdp {
                session_id: entry.session_id(),
                ndp_offset: entry.offset(),
                datagram_count: entry.datagram_count(),
            });

            if let Some(stale) = evicted {
                log::warn!(
                    "receive queue full, evicted NDP at offset {}",
                    stale.ndp_offset
                );
            }
        }

        Ok(count)
    }

    /// Cancels every pending descriptor belonging to `session_id`,
    /// returning how many were dropped.
    ///
    /// Descriptors for other sessions keep their relative order.
    pub fn cancel_session(&mut self, session_id: u8) -> u32 {
        let mut cancelled = 0;

        for _ in 0..self.len() {
            let Some(element) = self.dequeue() else { break };

            if element.session_id == Some(session_id) {
                cancelled += 1;
            } else {
                // Survivors rotate to the back, preserving FIFO order
                // across the whole sweep
                let _ = self.enqueue_inner(element);
            }
        }

        if cancelled > 0 {
            log::debug!("cancelled {cancelled} pending NDPs for session {session_id}");
        }

        cancelled
    }
}

impl<const LEN: usize> Default for RecvNdpQueue<LEN> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::vec::Vec;

    use mbb_rs::{ntb, NtbVariant, ValidationError};

    use crate::{RecvNdp, RecvNdpQueue};

    fn nth16(block_length: u16, ndp_index: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ntb::NTH16_SIGNATURE.to_le_bytes());
        buf.extend_from_slice(&(ntb::NTH16_LEN as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&block_length.to_le_bytes());
        buf.extend_from_slice(&ndp_index.to_le_bytes());
        buf
    }

    fn push_ndp16(
        buf: &mut Vec<u8>,
        signature: [u8; 4],
        length: u16,
        next_ndp_index: u16,
        pairs: &[(u16, u16)],
    ) {
        buf.extend_from_slice(&signature);
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&next_ndp_index.to_le_bytes());
        for (index, len) in pairs {
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }
    }

    fn ndp(session: u8, offset: u32) -> RecvNdp {
        RecvNdp {
            session_id: Some(session),
            ndp_offset: offset,
            datagram_count: 2,
        }
    }

    #[test]
    fn fifo_order() {
        let mut queue = RecvNdpQueue::<4>::new();
        assert!(queue.is_empty());

        assert!(queue.enqueue(ndp(0, 12)).is_none());
        assert!(queue.enqueue(ndp(0, 28)).is_none());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.front(), Some(&ndp(0, 12)));
        assert_eq!(queue.dequeue(), Some(ndp(0, 12)));
        assert_eq!(queue.dequeue(), Some(ndp(0, 28)));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn len_stays_correct_across_wrap_at_odd_capacity() {
        let mut queue = RecvNdpQueue::<5>::new();

        // Walk both heads past the wrap point
        for offset in 0..4 {
            assert!(queue.enqueue(ndp(0, offset)).is_none());
            assert_eq!(queue.dequeue(), Some(ndp(0, offset)));
        }
        assert!(queue.is_empty());

        // write_head has wrapped below read_head here
        assert!(queue.enqueue(ndp(1, 12)).is_none());
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_full());

        assert!(queue.enqueue(ndp(1, 28)).is_none());
        assert!(queue.enqueue(ndp(1, 44)).is_none());
        assert!(queue.enqueue(ndp(1, 60)).is_none());
        assert_eq!(queue.len(), 4);
        assert!(queue.is_full());

        assert_eq!(queue.dequeue(), Some(ndp(1, 12)));
        assert_eq!(queue.cancel_session(1), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_evicts_the_oldest() {
        let mut queue = RecvNdpQueue::<4>::new();

        assert!(queue.enqueue(ndp(0, 12)).is_none());
        assert!(queue.enqueue(ndp(0, 28)).is_none());
        assert!(queue.enqueue(ndp(0, 44)).is_none());
        assert!(queue.is_full());

        // Capacity is LEN - 1; the oldest gets pushed out
        assert_eq!(queue.enqueue(ndp(0, 60)), Some(ndp(0, 12)));
        assert_eq!(queue.front(), Some(&ndp(0, 28)));
    }

    #[test]
    fn queues_every_ndp_of_a_block() {
        // Two sessions, NDPs at offsets 12 and 28
        let mut buf = nth16(48, 12);
        push_ndp16(&mut buf, *b"IPS\0", 16, 28, &[(44, 4), (0, 0)]);
        push_ndp16(&mut buf, *b"IPS\x01", 16, 0, &[(44, 4), (0, 0)]);
        buf.resize(48, 0);

        let mut queue = RecvNdpQueue::<8>::new();
        assert_eq!(queue.queue_ntb(&buf, NtbVariant::Ntb16), Ok(4));
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.session_id, Some(0));
        assert_eq!(first.ndp_offset, 12);
        assert_eq!(first.datagram_count, 2);

        let second = queue.dequeue().unwrap();
        assert_eq!(second.session_id, Some(1));
        assert_eq!(second.ndp_offset, 28);
    }

    #[test]
    fn rejected_block_queues_nothing() {
        let mut buf = nth16(48, 12);
        // Chain loops 12 -> 12
        push_ndp16(&mut buf, *b"IPS\0", 16, 12, &[(0, 0), (0, 0)]);
        buf.resize(48, 0);

        let mut queue = RecvNdpQueue::<8>::new();
        assert_eq!(
            queue.queue_ntb(&buf, NtbVariant::Ntb16),
            Err(ValidationError::CycleDetected)
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_drops_only_the_target_session() {
        let mut queue = RecvNdpQueue::<8>::new();
        queue.enqueue(ndp(0, 12));
        queue.enqueue(ndp(1, 28));
        queue.enqueue(ndp(0, 44));
        queue.enqueue(ndp(2, 60));

        assert_eq!(queue.cancel_session(0), 2);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue(), Some(ndp(1, 28)));
        assert_eq!(queue.dequeue(), Some(ndp(2, 60)));
    }

    #[test]
    fn cancel_on_empty_queue_is_a_no_op() {
        let mut queue = RecvNdpQueue::<4>::new();
        assert_eq!(queue.cancel_session(3), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancel_with_no_match_preserves_everything() {
        let mut queue = RecvNdpQueue::<8>::new();
        queue.enqueue(ndp(0, 12));
        queue.enqueue(ndp(1, 28));

        assert_eq!(queue.cancel_session(9), 0);
        assert_eq!(queue.dequeue(), Some(ndp(0, 12)));
        assert_eq!(queue.dequeue(), Some(ndp(1, 28)));
    }
}
