//! Inbound byte queue
//!
//! Each session owns one `ByteQueue`: the staging buffer between its
//! asynchronous read producer and the frame dispatcher. The producer appends
//! raw chunks as they arrive; the dispatcher peeks at framing fields and
//! consumes whole packets. The queue is internally locked so append and drain
//! never race, which lets producers stay off the session's exclusive parse
//! lock entirely.

use bytes::BytesMut;
use parking_lot::Mutex;

/// Initial capacity for a session's inbound buffer
const INITIAL_CAPACITY: usize = 2048;

/// Thread-safe inbound byte buffer with framing-aware peeks
#[derive(Debug, Default)]
pub struct ByteQueue {
    data: Mutex<BytesMut>,
}

impl ByteQueue {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BytesMut::with_capacity(INITIAL_CAPACITY)),
        }
    }

    /// Append raw bytes, returning the total buffered length afterwards
    pub fn append(&self, bytes: &[u8]) -> usize {
        let mut data = self.data.lock();
        data.extend_from_slice(bytes);
        data.len()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Peek the opcode byte (first buffered byte) without consuming
    pub fn peek_opcode(&self) -> Option<u8> {
        self.data.lock().first().copied()
    }

    /// Peek the big-endian length field following the opcode without consuming.
    ///
    /// Returns `None` when fewer than 3 bytes are buffered.
    pub fn peek_packet_length(&self) -> Option<u16> {
        let data = self.data.lock();
        if data.len() < 3 {
            return None;
        }
        Some(u16::from_be_bytes([data[1], data[2]]))
    }

    /// Consume up to `count` bytes into `dest`, returning the number copied
    pub fn dequeue_into(&self, dest: &mut [u8], count: usize) -> usize {
        let mut data = self.data.lock();
        let n = count.min(data.len()).min(dest.len());
        let consumed = data.split_to(n);
        dest[..n].copy_from_slice(&consumed);
        n
    }

    /// Consume exactly `count` bytes, or fewer if the queue runs short
    pub fn dequeue_exact(&self, count: usize) -> Vec<u8> {
        let mut data = self.data.lock();
        let n = count.min(data.len());
        data.split_to(n).to_vec()
    }

    /// Consume the entire buffered contents
    pub fn drain_all(&self) -> Vec<u8> {
        let mut data = self.data.lock();
        data.split().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_len() {
        let queue = ByteQueue::new();
        assert!(queue.is_empty());

        assert_eq!(queue.append(&[1, 2, 3]), 3);
        assert_eq!(queue.append(&[4, 5]), 5);
        assert_eq!(queue.len(), 5);
    }

    #[test]
    fn test_peek_opcode() {
        let queue = ByteQueue::new();
        assert_eq!(queue.peek_opcode(), None);

        queue.append(&[0xEF, 0x01]);
        assert_eq!(queue.peek_opcode(), Some(0xEF));
        // Peek does not consume
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_peek_packet_length() {
        let queue = ByteQueue::new();
        queue.append(&[0xBF, 0x00]);
        assert_eq!(queue.peek_packet_length(), None);

        queue.append(&[0x0A]);
        assert_eq!(queue.peek_packet_length(), Some(10));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_dequeue_into() {
        let queue = ByteQueue::new();
        queue.append(&[1, 2, 3, 4, 5]);

        let mut dest = [0u8; 3];
        assert_eq!(queue.dequeue_into(&mut dest, 3), 3);
        assert_eq!(dest, [1, 2, 3]);
        assert_eq!(queue.len(), 2);

        // Short read when the queue runs out
        let mut dest = [0u8; 4];
        assert_eq!(queue.dequeue_into(&mut dest, 4), 2);
        assert_eq!(&dest[..2], &[4, 5]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dequeue_exact() {
        let queue = ByteQueue::new();
        queue.append(&[9, 8, 7]);

        assert_eq!(queue.dequeue_exact(2), vec![9, 8]);
        assert_eq!(queue.dequeue_exact(5), vec![7]);
        assert!(queue.dequeue_exact(1).is_empty());
    }

    #[test]
    fn test_drain_all() {
        let queue = ByteQueue::new();
        queue.append(&[0xAA, 0xBB, 0xCC]);

        assert_eq!(queue.drain_all(), vec![0xAA, 0xBB, 0xCC]);
        assert!(queue.is_empty());
        assert!(queue.drain_all().is_empty());
    }
}
