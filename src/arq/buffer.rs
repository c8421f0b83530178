use std::collections::VecDeque;

/// Bounded byte FIFO between the datalink engine and its byte surfaces.
/// Pushes that do not fit are rejected whole.
pub struct FifoBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl FifoBuffer {
    pub fn new(capacity: usize) -> Self {
        FifoBuffer {
            data: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn free(&self) -> usize {
        self.capacity - self.data.len()
    }

    pub fn flush(&mut self) {
        self.data.clear();
    }

    /// Append all of `bytes`, or nothing if they do not fit.
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free() {
            return false;
        }
        self.data.extend(bytes.iter().copied());
        true
    }

    /// Put bytes back at the front, ahead of everything queued. Used to
    /// re-queue an interrupted block so byte order is preserved. Bytes
    /// that do not fit are dropped from the tail of `bytes`.
    pub fn unshift(&mut self, bytes: &[u8]) {
        let take = bytes.len().min(self.free());
        for &byte in bytes[..take].iter().rev() {
            self.data.push_front(byte);
        }
    }

    /// Pop up to `out.len()` bytes; returns how many were written.
    pub fn pop(&mut self, out: &mut [u8]) -> usize {
        let count = out.len().min(self.data.len());
        for slot in out.iter_mut().take(count) {
            *slot = self.data.pop_front().unwrap();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_preserves_order() {
        let mut fifo = FifoBuffer::new(16);
        assert!(fifo.push(&[1, 2, 3, 4, 5]));
        let mut out = [0u8; 3];
        assert_eq!(fifo.pop(&mut out), 3);
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(fifo.len(), 2);

        assert!(fifo.push(&[6, 7]));
        let mut rest = [0u8; 8];
        assert_eq!(fifo.pop(&mut rest), 4);
        assert_eq!(&rest[..4], &[4, 5, 6, 7]);
    }

    #[test]
    fn oversized_push_is_rejected_whole() {
        let mut fifo = FifoBuffer::new(4);
        assert!(fifo.push(&[1, 2, 3]));
        assert!(!fifo.push(&[4, 5]));
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.free(), 1);
    }

    #[test]
    fn unshift_puts_bytes_ahead_of_the_queue() {
        let mut fifo = FifoBuffer::new(16);
        fifo.push(&[10, 11]);
        fifo.unshift(&[1, 2, 3]);
        let mut out = [0u8; 5];
        assert_eq!(fifo.pop(&mut out), 5);
        assert_eq!(out, [1, 2, 3, 10, 11]);
    }

    #[test]
    fn flush_empties_the_fifo() {
        let mut fifo = FifoBuffer::new(8);
        fifo.push(&[1, 2, 3]);
        fifo.flush();
        assert!(fifo.is_empty());
        assert_eq!(fifo.free(), 8);
    }
}
