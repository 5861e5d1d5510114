//! Bounded, cancellable block queue between the acquisition producer and
//! the localization worker.
//!
//! `push` parks while the buffer is full and `pop` parks while it is empty.
//! Both wake up on [`StreamBuffer::shutdown`] regardless of fill level, so a
//! stop request can never leave either side hanging.

use crate::{Error, Result};
use log::{debug, trace};
use nalgebra::DMatrix;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Immutable `[channels × samples]` block of raw measurements
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    data: DMatrix<f64>,
}

impl DataBlock {
    /// Wrap a `[channels × samples]` matrix
    #[must_use]
    pub fn new(data: DMatrix<f64>) -> Self {
        Self { data }
    }

    /// Number of channels (rows)
    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples (columns)
    pub fn samples(&self) -> usize {
        self.data.ncols()
    }

    /// `(channels, samples)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.shape()
    }

    /// Borrow the samples
    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    /// Take ownership of the samples
    pub fn into_inner(self) -> DMatrix<f64> {
        self.data
    }
}

struct BufferState {
    queue: VecDeque<DataBlock>,
    shutdown: bool,
}

/// Bounded FIFO of [`DataBlock`]s with explicit shutdown
pub struct StreamBuffer {
    state: Mutex<BufferState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity_blocks: usize,
    channels: usize,
    samples_per_block: usize,
}

impl StreamBuffer {
    /// Create a buffer holding `capacity_blocks` blocks of `channels × samples_per_block`
    ///
    /// # Errors
    ///
    /// Returns an error if any dimension is zero
    pub fn new(capacity_blocks: usize, channels: usize, samples_per_block: usize) -> Result<Self> {
        if capacity_blocks == 0 || channels == 0 || samples_per_block == 0 {
            return Err(Error::InvalidInput(format!(
                "Stream buffer dimensions must be non-zero, got {capacity_blocks} blocks of {channels}x{samples_per_block}"
            )));
        }
        debug!(
            "Creating stream buffer: {} blocks of {}x{}",
            capacity_blocks, channels, samples_per_block
        );
        Ok(Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity_blocks),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity_blocks,
            channels,
            samples_per_block,
        })
    }

    /// Append a block, parking while the buffer is full
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlockShape`] for a block of the wrong shape and
    /// [`Error::BufferShutdown`] if the buffer is, or becomes, shut down
    pub fn push(&self, block: DataBlock) -> Result<()> {
        let expected = (self.channels, self.samples_per_block);
        if block.shape() != expected {
            return Err(Error::BlockShape {
                expected,
                actual: block.shape(),
            });
        }

        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(Error::BufferShutdown);
            }
            if state.queue.len() < self.capacity_blocks {
                break;
            }
            trace!("Stream buffer full, producer waiting");
            self.not_full.wait(&mut state);
        }
        state.queue.push_back(block);
        drop(state);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest block, parking while the buffer is empty
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferShutdown`] if the buffer is, or becomes, shut down
    pub fn pop(&self) -> Result<DataBlock> {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return Err(Error::BufferShutdown);
            }
            if let Some(block) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(block);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Wake every parked caller and refuse further push/pop until [`reopen`](Self::reopen)
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);

        debug!("Stream buffer shut down");
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drop all queued blocks
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        drop(state);

        if dropped > 0 {
            debug!("Cleared {} queued blocks", dropped);
        }
        self.not_full.notify_all();
    }

    /// Accept push/pop again after a shutdown
    pub fn reopen(&self) {
        self.state.lock().shutdown = false;
    }

    /// Whether [`shutdown`](Self::shutdown) is in effect
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of queued blocks
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no block is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued blocks
    pub fn capacity_blocks(&self) -> usize {
        self.capacity_blocks
    }

    /// Maximum number of buffered values (blocks × channels × samples)
    pub fn capacity_values(&self) -> usize {
        self.capacity_blocks * self.channels * self.samples_per_block
    }

    /// `(channels, samples)` of accepted blocks
    pub fn block_shape(&self) -> (usize, usize) {
        (self.channels, self.samples_per_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn block(tag: f64) -> DataBlock {
        DataBlock::new(DMatrix::from_element(2, 3, tag))
    }

    #[test]
    fn test_fifo_order() {
        let buffer = StreamBuffer::new(2, 2, 3).unwrap();
        buffer.push(block(1.0)).unwrap();
        buffer.push(block(2.0)).unwrap();
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap(), block(1.0));
        assert_eq!(buffer.pop().unwrap(), block(2.0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_after_shutdown_returns_immediately() {
        let buffer = StreamBuffer::new(2, 2, 3).unwrap();
        buffer.shutdown();
        assert!(matches!(buffer.pop(), Err(Error::BufferShutdown)));
        assert!(matches!(buffer.push(block(1.0)), Err(Error::BufferShutdown)));
    }

    #[test]
    fn test_shutdown_releases_parked_pop() {
        let buffer = StreamBuffer::new(2, 2, 3).unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let consumer = &buffer;
            s.spawn(move || {
                let result = consumer.pop();
                tx.send(result.is_err()).unwrap();
            });

            // Give the consumer time to park on the empty buffer
            thread::sleep(Duration::from_millis(50));
            buffer.shutdown();

            let released = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(released);
        });
    }

    #[test]
    fn test_shutdown_releases_parked_push() {
        let buffer = StreamBuffer::new(1, 2, 3).unwrap();
        buffer.push(block(1.0)).unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let producer = &buffer;
            s.spawn(move || {
                let result = producer.push(block(2.0));
                tx.send(matches!(result, Err(Error::BufferShutdown))).unwrap();
            });

            thread::sleep(Duration::from_millis(50));
            buffer.shutdown();

            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        });
    }

    #[test]
    fn test_backpressure_blocks_producer_until_pop() {
        let buffer = StreamBuffer::new(1, 2, 3).unwrap();
        buffer.push(block(1.0)).unwrap();
        let (tx, rx) = mpsc::channel();

        thread::scope(|s| {
            let producer = &buffer;
            s.spawn(move || {
                producer.push(block(2.0)).unwrap();
                tx.send(()).unwrap();
            });

            // Producer must still be parked
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            assert_eq!(buffer.pop().unwrap(), block(1.0));
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        });

        assert_eq!(buffer.pop().unwrap(), block(2.0));
    }

    #[test]
    fn test_clear_and_reopen_make_buffer_reusable() {
        let buffer = StreamBuffer::new(2, 2, 3).unwrap();
        buffer.push(block(1.0)).unwrap();
        buffer.shutdown();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.is_shut_down());

        buffer.reopen();
        buffer.push(block(3.0)).unwrap();
        assert_eq!(buffer.pop().unwrap(), block(3.0));
    }

    #[test]
    fn test_shape_checked() {
        let buffer = StreamBuffer::new(2, 2, 3).unwrap();
        let wrong = DataBlock::new(DMatrix::zeros(3, 3));
        match buffer.push(wrong) {
            Err(Error::BlockShape { expected, actual }) => {
                assert_eq!(expected, (2, 3));
                assert_eq!(actual, (3, 3));
            }
            other => panic!("Expected BlockShape error, got {:?}", other),
        }
        assert_eq!(buffer.capacity_values(), 12);
        assert!(StreamBuffer::new(0, 2, 3).is_err());
    }

    #[test]
    fn test_concurrent_producer_keeps_order() {
        let buffer = StreamBuffer::new(3, 2, 3).unwrap();
        let count = 200;

        thread::scope(|s| {
            s.spawn(|| {
                for i in 0..count {
                    buffer.push(block(f64::from(i))).unwrap();
                }
            });

            for i in 0..count {
                let received = buffer.pop().unwrap();
                assert_eq!(received.data()[(0, 0)], f64::from(i));
            }
        });
    }

    proptest! {
        #[test]
        fn prop_pop_order_matches_push_order(tags in proptest::collection::vec(-1e6f64..1e6, 1..16)) {
            let buffer = StreamBuffer::new(tags.len(), 2, 3).unwrap();
            for &tag in &tags {
                buffer.push(block(tag)).unwrap();
            }
            for &tag in &tags {
                prop_assert_eq!(buffer.pop().unwrap().data()[(1, 2)], tag);
            }
        }
    }
}
