//! The music pipe.
//!
//! Bounded multi-consumer FIFO of reference-counted chunks between the
//! player thread (producer) and the output worker threads (consumers).
//!
//! ## Design
//! - Each registered consumer has a stable small id; consumption is tracked
//!   with a per-chunk bitmap keyed by those ids, so marking a chunk and
//!   releasing the head are O(1) without hot-path atomics.
//! - A chunk leaves the head only when every registered consumer has
//!   consumed it; total order is preserved per consumer and no consumer
//!   sees a chunk twice.
//! - The producer may block on a condvar once the soft bound is exceeded;
//!   it is woken whenever a head chunk is released, the pipe is cleared,
//!   or the pipe shuts down.

use crate::chunk::MusicChunk;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Maximum number of concurrently registered consumers.
pub const MAX_CONSUMERS: usize = 32;

struct Slot {
    chunk: Arc<MusicChunk>,
    /// Bitmap of consumer ids that have consumed this chunk
    consumed: u32,
}

struct PipeInner {
    slots: VecDeque<Slot>,
    /// Bitmap of registered consumer ids
    consumers: u32,
    next_seq: u64,
    shutdown: bool,
}

impl PipeInner {
    /// Release fully-consumed chunks from the head.
    ///
    /// Returns the number of chunks released.
    fn release_head(&mut self) -> usize {
        let mut released = 0;
        while let Some(head) = self.slots.front() {
            if head.consumed & self.consumers == self.consumers {
                self.slots.pop_front();
                released += 1;
            } else {
                break;
            }
        }
        released
    }
}

/// Bounded multi-consumer chunk FIFO.
pub struct MusicPipe {
    inner: Mutex<PipeInner>,
    not_full: Condvar,
    soft_bound: usize,
}

impl MusicPipe {
    pub fn new(soft_bound: usize) -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                slots: VecDeque::new(),
                consumers: 0,
                next_seq: 1,
                shutdown: false,
            }),
            not_full: Condvar::new(),
            soft_bound: soft_bound.max(1),
        }
    }

    /// Register a consumer id (assigned by the output set).
    ///
    /// The consumer starts at the current tail: chunks already in the pipe
    /// are not replayed to it.
    pub fn register_consumer(&self, id: usize) {
        assert!(id < MAX_CONSUMERS);
        let bit = 1u32 << id;
        let mut inner = self.inner.lock().unwrap();
        debug_assert!(inner.consumers & bit == 0, "consumer {id} double-registered");
        inner.consumers |= bit;
        for slot in inner.slots.iter_mut() {
            slot.consumed |= bit;
        }
    }

    /// Unregister a consumer; its outstanding chunks count as consumed.
    pub fn unregister_consumer(&self, id: usize) {
        let bit = 1u32 << id;
        let mut inner = self.inner.lock().unwrap();
        inner.consumers &= !bit;
        if inner.release_head() > 0 {
            self.not_full.notify_all();
        }
    }

    /// Append a chunk, blocking while the pipe is over its soft bound.
    ///
    /// Returns the sequence id assigned to the chunk. Fails only when the
    /// pipe has been shut down.
    pub fn push(&self, mut chunk: MusicChunk) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();

        while inner.slots.len() >= self.soft_bound && !inner.shutdown {
            inner = self.not_full.wait(inner).unwrap();
        }

        if inner.shutdown {
            return Err(Error::InvalidState("music pipe is shut down".into()));
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        chunk.seq = seq;
        let consumed = 0;
        inner.slots.push_back(Slot {
            chunk: Arc::new(chunk),
            consumed,
        });
        Ok(seq)
    }

    /// Oldest chunk not yet consumed by `id`, if any.
    pub fn peek(&self, id: usize) -> Option<Arc<MusicChunk>> {
        let bit = 1u32 << id;
        let inner = self.inner.lock().unwrap();
        inner
            .slots
            .iter()
            .find(|slot| slot.consumed & bit == 0)
            .map(|slot| Arc::clone(&slot.chunk))
    }

    /// Mark `seq` consumed by `id`; releases the head when everyone is done
    /// with it.
    pub fn consume(&self, id: usize, seq: u64) {
        let bit = 1u32 << id;
        let mut inner = self.inner.lock().unwrap();
        if let Some(slot) = inner.slots.iter_mut().find(|s| s.chunk.seq == seq) {
            slot.consumed |= bit;
        }
        if inner.release_head() > 0 {
            self.not_full.notify_all();
        }
    }

    /// Whether `id` has consumed the chunk with sequence id `seq`.
    ///
    /// Chunks that have already left the pipe count as consumed.
    pub fn is_consumed(&self, id: usize, seq: u64) -> bool {
        let bit = 1u32 << id;
        let inner = self.inner.lock().unwrap();
        match inner.slots.iter().find(|s| s.chunk.seq == seq) {
            Some(slot) => slot.consumed & bit != 0,
            None => true,
        }
    }

    /// Discard all buffered chunks (used on CANCEL).
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.slots.is_empty() {
            inner.slots.clear();
            self.not_full.notify_all();
        }
    }

    /// Number of chunks still live in the pipe.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reject all further pushes and wake a blocked producer.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutdown = true;
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_common::AudioFormat;
    use std::thread;
    use std::time::Duration;

    fn chunk() -> MusicChunk {
        MusicChunk::new(AudioFormat::new(44100, 2), vec![0.0; 8])
    }

    #[test]
    fn test_order_per_consumer() {
        let pipe = MusicPipe::new(16);
        pipe.register_consumer(0);
        pipe.register_consumer(1);

        let a = pipe.push(chunk()).unwrap();
        let b = pipe.push(chunk()).unwrap();

        // both consumers see the chunks in push order
        assert_eq!(pipe.peek(0).unwrap().seq, a);
        pipe.consume(0, a);
        assert_eq!(pipe.peek(0).unwrap().seq, b);

        // consumer 1 has not consumed anything yet, chunk a is still live
        assert_eq!(pipe.len(), 2);
        assert_eq!(pipe.peek(1).unwrap().seq, a);

        pipe.consume(1, a);
        // now everyone consumed a, it is released
        assert_eq!(pipe.len(), 1);
    }

    #[test]
    fn test_no_chunk_seen_twice() {
        let pipe = MusicPipe::new(16);
        pipe.register_consumer(3);

        let a = pipe.push(chunk()).unwrap();
        pipe.consume(3, a);
        assert!(pipe.peek(3).is_none());
        assert!(pipe.is_consumed(3, a));
    }

    #[test]
    fn test_late_registration_starts_at_tail() {
        let pipe = MusicPipe::new(16);
        pipe.register_consumer(0);
        pipe.push(chunk()).unwrap();

        pipe.register_consumer(1);
        // the pre-existing chunk is not replayed to the late consumer
        assert!(pipe.peek(1).is_none());
    }

    #[test]
    fn test_unregister_releases() {
        let pipe = MusicPipe::new(16);
        pipe.register_consumer(0);
        pipe.register_consumer(1);

        let a = pipe.push(chunk()).unwrap();
        pipe.consume(0, a);
        assert_eq!(pipe.len(), 1);

        // consumer 1 goes away without consuming; the chunk is released
        pipe.unregister_consumer(1);
        assert_eq!(pipe.len(), 0);
    }

    #[test]
    fn test_clear() {
        let pipe = MusicPipe::new(16);
        pipe.register_consumer(0);
        pipe.push(chunk()).unwrap();
        pipe.push(chunk()).unwrap();
        pipe.clear();
        assert!(pipe.is_empty());
        assert!(pipe.peek(0).is_none());
    }

    #[test]
    fn test_backpressure_blocks_and_wakes() {
        let pipe = Arc::new(MusicPipe::new(2));
        pipe.register_consumer(0);
        let a = pipe.push(chunk()).unwrap();
        pipe.push(chunk()).unwrap();

        let producer = {
            let pipe = Arc::clone(&pipe);
            thread::spawn(move || pipe.push(chunk()))
        };

        // give the producer time to block on the full pipe
        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        pipe.consume(0, a);
        let seq = producer.join().unwrap().unwrap();
        assert_eq!(pipe.len(), 2);
        assert!(seq > a);
    }

    #[test]
    fn test_shutdown_fails_push() {
        let pipe = MusicPipe::new(4);
        pipe.shutdown();
        assert!(pipe.push(chunk()).is_err());
    }
}
