use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

struct Inner {
    data: VecDeque<f64>,
    capacity: usize,
    closed: bool,
}

/// Bounded SPSC sample ring between the audio driver threads and the DSP
/// workers. Reads and writes block until satisfied; back-pressure instead
/// of sample loss.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        RingBuffer {
            inner: Mutex::new(Inner {
                data: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().data.is_empty()
    }

    /// Wake all waiters; subsequent writes are dropped and reads return
    /// short. Used at shutdown.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Block until every sample is queued.
    pub fn write(&self, samples: &[f64]) {
        let mut remaining = samples;
        while !remaining.is_empty() {
            let mut inner = self.inner.lock().unwrap();
            while inner.capacity == inner.data.len() && !inner.closed {
                inner = self.not_full.wait(inner).unwrap();
            }
            if inner.closed {
                return;
            }
            let free = inner.capacity - inner.data.len();
            let take = free.min(remaining.len());
            inner.data.extend(remaining[..take].iter().copied());
            remaining = &remaining[take..];
            drop(inner);
            self.not_empty.notify_one();
        }
    }

    /// Queue what fits without blocking; returns the count written.
    pub fn try_write(&self, samples: &[f64]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return 0;
        }
        let free = inner.capacity - inner.data.len();
        let take = free.min(samples.len());
        inner.data.extend(samples[..take].iter().copied());
        drop(inner);
        if take > 0 {
            self.not_empty.notify_one();
        }
        take
    }

    /// Block until `out` is full (short only when closed).
    pub fn read(&self, out: &mut [f64]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            let mut inner = self.inner.lock().unwrap();
            while inner.data.is_empty() && !inner.closed {
                inner = self.not_empty.wait(inner).unwrap();
            }
            if inner.data.is_empty() && inner.closed {
                return filled;
            }
            while filled < out.len() {
                match inner.data.pop_front() {
                    Some(sample) => {
                        out[filled] = sample;
                        filled += 1;
                    }
                    None => break,
                }
            }
            drop(inner);
            self.not_full.notify_one();
        }
        filled
    }

    /// Drain what is available without blocking; returns the count read.
    pub fn try_read(&self, out: &mut [f64]) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let mut filled = 0;
        while filled < out.len() {
            match inner.data.pop_front() {
                Some(sample) => {
                    out[filled] = sample;
                    filled += 1;
                }
                None => break,
            }
        }
        drop(inner);
        if filled > 0 {
            self.not_full.notify_one();
        }
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn interleaved_random_transfers_preserve_order() {
        // 1M samples through a 4K ring, random chunk sizes on both sides.
        let ring = Arc::new(RingBuffer::new(4096));
        let total = 1_000_000usize;

        let producer_ring = ring.clone();
        let producer = thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(1);
            let mut sent = 0usize;
            while sent < total {
                let chunk = rng.gen_range(1..=937).min(total - sent);
                let block: Vec<f64> = (sent..sent + chunk).map(|v| v as f64).collect();
                producer_ring.write(&block);
                sent += chunk;
            }
        });

        let mut rng = StdRng::seed_from_u64(2);
        let mut received = 0usize;
        let mut buffer = vec![0.0f64; 1024];
        while received < total {
            let want = rng.gen_range(1..=1024).min(total - received);
            let got = ring.read(&mut buffer[..want]);
            for (i, &value) in buffer[..got].iter().enumerate() {
                assert_eq!(value, (received + i) as f64);
            }
            received += got;
        }

        producer.join().unwrap();
        assert!(ring.is_empty());
    }

    #[test]
    fn close_releases_a_blocked_reader() {
        let ring = Arc::new(RingBuffer::new(16));
        let reader_ring = ring.clone();
        let reader = thread::spawn(move || {
            let mut out = [0.0f64; 8];
            reader_ring.read(&mut out)
        });
        thread::sleep(std::time::Duration::from_millis(20));
        ring.close();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn try_variants_never_block() {
        let ring = RingBuffer::new(4);
        assert_eq!(ring.try_write(&[1.0, 2.0, 3.0, 4.0, 5.0]), 4);
        let mut out = [0.0f64; 8];
        assert_eq!(ring.try_read(&mut out), 4);
        assert_eq!(ring.try_read(&mut out), 0);
    }
}
