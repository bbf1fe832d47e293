//! A bounded pool of reusable byte buffers.
//!
//! Caps peak unpack memory at `max_buffers * buffer_size`. Buffers are
//! provisioned lazily with a compare-and-swap on the count, so concurrent
//! acquirers never allocate past the cap and never contend on a mutex.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

pub(super) struct BufferPool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    count: AtomicUsize,
    max: usize,
    size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_buffers: usize) -> Arc<BufferPool> {
        let max = max_buffers.max(1);
        let (tx, rx) = bounded(max);
        let pool = Arc::new(BufferPool {
            tx,
            rx,
            count: AtomicUsize::new(0),
            max,
            size: buffer_size,
        });
        // Start with one buffer so the first acquire never hits the
        // provisioning path.
        pool.add_buffer();
        pool
    }

    /// Provision one more buffer unless the pool is at its cap.
    fn add_buffer(&self) {
        loop {
            let count = self.count.load(Ordering::Relaxed);
            if count == self.max {
                return;
            }
            if self
                .count
                .compare_exchange(count, count + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        let _ = self.tx.send(vec![0; self.size]);
    }

    /// Acquire a buffer, blocking while the pool is exhausted. The guard
    /// returns its buffer on drop, balancing every acquire.
    pub fn wait(self: &Arc<Self>) -> PooledBuffer {
        let data = match self.rx.try_recv() {
            Ok(data) => data,
            Err(_) => {
                self.add_buffer();
                // May receive a different buffer than the one just added;
                // looping here would over-allocate under contention.
                self.rx
                    .recv()
                    .expect("buffer pool channel closed while pool alive")
            }
        };
        PooledBuffer {
            data,
            pool: self.clone(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.size
    }

    #[cfg(test)]
    pub fn allocated(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

/// A buffer checked out of the pool.
pub(super) struct PooledBuffer {
    data: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        let _ = self.pool.tx.send(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn starts_with_one_buffer() {
        let pool = BufferPool::new(8, 4);
        assert_eq!(pool.allocated(), 1);
        let buf = pool.wait();
        assert_eq!(buf.data().len(), 8);
    }

    #[test]
    fn zero_cap_is_clamped_to_one() {
        let pool = BufferPool::new(8, 0);
        let _buf = pool.wait();
        assert_eq!(pool.allocated(), 1);
    }

    #[test]
    fn third_acquire_blocks_until_release() {
        let pool = BufferPool::new(8, 2);
        let first = pool.wait();
        let second = pool.wait();
        assert_eq!(pool.allocated(), 2);

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let waiter_pool = pool.clone();
        let waiter = std::thread::spawn(move || {
            let buf = waiter_pool.wait();
            done_tx.send(()).unwrap();
            drop(buf);
        });

        // The third acquire must stay blocked while both buffers are out.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(first);
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("third acquire should proceed after a release");
        waiter.join().unwrap();

        drop(second);
        assert_eq!(pool.allocated(), 2);
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = BufferPool::new(16, 3);
        for _ in 0..32 {
            let buf = pool.wait();
            drop(buf);
        }
        assert!(pool.allocated() <= 3);
    }
}
